//! Types for the objects the central controller disseminates to node agents.
//!
//! These mirror the controller's wire format and carry no behavior; the cache
//! crate translates them into the domain model before storing anything.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The direction of traffic a rule constrains, relative to the pods the
/// owning policy applies to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Direction {
    #[default]
    In,
    Out,
}

/// A transport protocol a rule's service entry may constrain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

/// Identifies a pod by name within a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodReference {
    pub name: String,
    pub namespace: String,
}

/// A literal CIDR carried inline in a policy peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IPBlock {
    pub cidr: IpNet,
}

/// One side of a rule: the sources (for inbound rules) or destinations (for
/// outbound rules) it matches. Address groups are referenced by name and
/// resolved by the node agent as group membership arrives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicyPeer {
    pub address_groups: Vec<String>,
    pub ip_blocks: Vec<IPBlock>,
}

/// A (protocol, port) pair a rule may be limited to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
}

/// A single rule of a [`NetworkPolicy`]. Only `from` is meaningful for
/// inbound rules and only `to` for outbound rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicyRule {
    pub direction: Direction,
    pub from: NetworkPolicyPeer,
    pub to: NetworkPolicyPeer,
    pub services: Vec<Service>,
}

/// A policy as computed by the controller for this node: its rules plus the
/// applied-to groups shared by all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicy {
    /// The controller-assigned identity of the policy; the unit of rule
    /// ownership.
    pub uid: String,
    pub name: String,
    pub rules: Vec<NetworkPolicyRule>,
    pub applied_to_groups: Vec<String>,
}

/// Full membership of a named set of IP endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressGroup {
    pub name: String,
    pub ip_addresses: Vec<IpAddr>,
}

/// An incremental delta to an [`AddressGroup`]'s membership.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressGroupPatch {
    pub name: String,
    pub added_ip_addresses: Vec<IpAddr>,
    pub removed_ip_addresses: Vec<IpAddr>,
}

/// Full membership of a named set of pods.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppliedToGroup {
    pub name: String,
    pub pods: Vec<PodReference>,
}

/// An incremental delta to an [`AppliedToGroup`]'s membership.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppliedToGroupPatch {
    pub name: String,
    pub added_pods: Vec<PodReference>,
    pub removed_pods: Vec<PodReference>,
}
