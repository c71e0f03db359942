//! Core types shared between the rule cache and the dataplane reconciler.
//!
//! The reconciler never sees the controller's wire objects; it consumes
//! [`CompletedRule`]s pulled from the cache once every group a rule
//! references has been resolved.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use ahash::AHashSet as HashSet;
pub use ipnet::IpNet;
use std::{fmt, sync::Arc};

/// Resolved addresses, in canonical text form.
pub type AddressSet = HashSet<String>;

/// Resolved pod references.
pub type PodSet = HashSet<PodRef>;

/// Content-derived identifier of a translated rule. Stable across re-adds of
/// identical content under the same policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(String);

/// Identifies a pod by name and namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

/// The direction of traffic a rule constrains.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

/// A transport protocol a rule's service entry may constrain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

/// A (protocol, port) constraint on a rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePort {
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
}

/// One side of a rule: named address groups to be resolved by the cache plus
/// literal CIDRs passed through to the dataplane as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RulePeer {
    pub address_groups: Vec<String>,
    pub ip_blocks: Vec<IpNet>,
}

/// A single translated rule of a policy.
///
/// Only `from` is meaningful for [`Direction::In`] rules and only `to` for
/// [`Direction::Out`] rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub direction: Direction,
    pub from: RulePeer,
    pub to: RulePeer,
    pub services: Vec<ServicePort>,
    pub applied_to_groups: Vec<String>,
    pub policy_uid: String,
}

/// A rule joined with its fully resolved address and pod sets; ready to be
/// programmed into the dataplane.
///
/// The underlying [`Rule`] is shared with the cache and must be treated as
/// immutable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedRule {
    pub rule: Arc<Rule>,
    pub from_addresses: AddressSet,
    pub to_addresses: AddressSet,
    pub pods: PodSet,
}

// === impl RuleId ===

impl RuleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// === impl PodRef ===

impl PodRef {
    pub fn new(name: impl ToString, namespace: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.namespace)
    }
}
