//! The rule cache proper: the rule store with its secondary indices, the two
//! group stores, and the join logic that decides which rules became dirty on
//! each mutation.
//!
//! All state lives behind one lock (see [`SharedCache`]). Every mutator runs
//! under the write guard from first mutation through the last dirty-handler
//! invocation, so an observer sees each mutation atomically and the dirty
//! stream never misses a change.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use policy_agent_api as api;
use policy_agent_core::{
    AddressSet, CompletedRule, Direction, PodRef, PodSet, Protocol, Rule, RuleId, RulePeer,
    ServicePort,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{fmt, net::IpAddr, sync::Arc};

/// Hex characters of the content digest kept as a rule ID.
const RULE_ID_LENGTH: usize = 16;

pub type SharedCache = Arc<RwLock<RuleCache>>;

/// Invoked with each rule ID whose completed projection may have changed.
///
/// Runs synchronously under the cache's write lock: it must not block and
/// must not call back into the cache. Handing the ID to a
/// [`DirtyRuleQueue`](crate::DirtyRuleQueue) satisfies both.
pub type DirtyRuleHandler = Box<dyn Fn(&RuleId) + Send + Sync>;

/// Returned by the patch mutators when the named group has never been added.
///
/// Recoverable: the caller logs and drops the patch, since a subsequent full
/// add of the group reconciles the membership anyway.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("address group {0} does not exist in the cache")]
    UnknownAddressGroup(String),

    #[error("applied-to group {0} does not exist in the cache")]
    UnknownAppliedToGroup(String),
}

/// The outcome of a completed-rule lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleLookup {
    /// The rule exists and every group it references has been resolved.
    Completed(CompletedRule),

    /// The rule exists but at least one referenced group is still missing.
    Incomplete,

    /// No rule with this ID is in the cache.
    Unknown,
}

/// Caches the controller's NetworkPolicy, AddressGroup, and AppliedToGroup
/// objects and joins them into completed rules.
///
/// The three object kinds arrive independently and in any order; a rule
/// becomes programmable only once all of its referenced groups are known.
/// Rules are indexed by the group names they reference so that a group
/// mutation dirties exactly the rules it touches.
pub struct RuleCache {
    rules: HashMap<RuleId, Arc<Rule>>,

    /// Rule IDs by referenced address-group name, both peers combined.
    rules_by_address_group: HashMap<String, HashSet<RuleId>>,

    /// Rule IDs by referenced applied-to-group name.
    rules_by_applied_to_group: HashMap<String, HashSet<RuleId>>,

    /// Rule IDs by owning policy UID. Mirrors exactly the rules currently in
    /// the store.
    rules_by_policy: HashMap<String, HashSet<RuleId>>,

    address_set_by_group: HashMap<String, AddressSet>,
    pod_set_by_group: HashMap<String, PodSet>,

    dirty_rule_handler: DirtyRuleHandler,

    /// This node's own addresses. Pass-through metadata for downstream
    /// consumers; resolution never filters them out of address sets.
    node_ips: Vec<IpAddr>,
}

// === impl RuleCache ===

impl RuleCache {
    pub fn new(dirty_rule_handler: DirtyRuleHandler, node_ips: Vec<IpAddr>) -> Self {
        Self {
            rules: HashMap::default(),
            rules_by_address_group: HashMap::default(),
            rules_by_applied_to_group: HashMap::default(),
            rules_by_policy: HashMap::default(),
            address_set_by_group: HashMap::default(),
            pod_set_by_group: HashMap::default(),
            dirty_rule_handler,
            node_ips,
        }
    }

    pub fn shared(dirty_rule_handler: DirtyRuleHandler, node_ips: Vec<IpAddr>) -> SharedCache {
        Arc::new(RwLock::new(Self::new(dirty_rule_handler, node_ips)))
    }

    /// The node's own addresses, as supplied at construction.
    pub fn node_ips(&self) -> &[IpAddr] {
        &self.node_ips
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn address_group_count(&self) -> usize {
        self.address_set_by_group.len()
    }

    pub fn applied_to_group_count(&self) -> usize {
        self.pod_set_by_group.len()
    }

    pub fn network_policy_count(&self) -> usize {
        self.rules_by_policy.len()
    }

    /// Translates and stores every rule of `policy`, marking each inserted
    /// rule dirty. Re-adding a policy is idempotent: the IDs are content
    /// addressed, so the same objects land in the same slots.
    pub fn add_network_policy(&mut self, policy: &api::NetworkPolicy) {
        let mut dirty = HashSet::default();
        for npr in &policy.rules {
            let rule = to_rule(npr, policy);
            dirty.insert(rule.id.clone());
            self.insert_rule(Arc::new(rule));
        }
        tracing::debug!(policy = %policy.uid, rules = dirty.len(), "added network policy");
        self.notify(dirty);
    }

    /// Reconciles the stored rules of `policy.uid` against the policy's
    /// current rules. Rules whose ID survives are untouched and not marked
    /// dirty; only the symmetric difference is.
    pub fn update_network_policy(&mut self, policy: &api::NetworkPolicy) {
        let mut new = HashMap::default();
        for npr in &policy.rules {
            let rule = to_rule(npr, policy);
            new.insert(rule.id.clone(), rule);
        }
        let old = self
            .rules_by_policy
            .get(&policy.uid)
            .cloned()
            .unwrap_or_default();

        let mut dirty = HashSet::default();
        for id in &old {
            if !new.contains_key(id) {
                self.remove_rule(id);
                dirty.insert(id.clone());
            }
        }
        for (id, rule) in new {
            if !old.contains(&id) {
                self.insert_rule(Arc::new(rule));
                dirty.insert(id);
            }
        }
        tracing::debug!(policy = %policy.uid, dirty = dirty.len(), "updated network policy");
        self.notify(dirty);
    }

    /// Removes every rule owned by `policy.uid` and marks each removed rule
    /// dirty. Deleting an unknown policy is a no-op.
    pub fn delete_network_policy(&mut self, policy: &api::NetworkPolicy) {
        let old = match self.rules_by_policy.get(&policy.uid) {
            Some(ids) => ids.clone(),
            None => return,
        };
        for id in &old {
            self.remove_rule(id);
        }
        tracing::debug!(policy = %policy.uid, rules = old.len(), "deleted network policy");
        self.notify(old);
    }

    /// Replaces (or creates) the group's address set with the full
    /// membership carried by `group`. An empty membership is a valid set,
    /// distinct from the group being absent.
    pub fn add_address_group(&mut self, group: &api::AddressGroup) {
        let addresses: AddressSet = group.ip_addresses.iter().map(|ip| ip.to_string()).collect();
        tracing::debug!(group = %group.name, addresses = addresses.len(), "added address group");
        self.address_set_by_group
            .insert(group.name.clone(), addresses);
        self.notify_address_group(&group.name);
    }

    /// Applies membership deltas to an existing address group. Fails without
    /// touching any state if the group was never added; redundant deltas are
    /// tolerated. Every rule referencing the group is marked dirty.
    pub fn patch_address_group(&mut self, patch: &api::AddressGroupPatch) -> Result<(), PatchError> {
        let addresses = self
            .address_set_by_group
            .get_mut(&patch.name)
            .ok_or_else(|| PatchError::UnknownAddressGroup(patch.name.clone()))?;
        for ip in &patch.removed_ip_addresses {
            addresses.remove(&ip.to_string());
        }
        for ip in &patch.added_ip_addresses {
            addresses.insert(ip.to_string());
        }
        tracing::debug!(group = %patch.name, addresses = addresses.len(), "patched address group");
        self.notify_address_group(&patch.name);
        Ok(())
    }

    /// Removes the group's address set, marking every rule that references
    /// it dirty: those rules just ceased to be complete. Deleting an unknown
    /// group is a no-op.
    pub fn delete_address_group(&mut self, name: &str) {
        if self.address_set_by_group.remove(name).is_none() {
            return;
        }
        tracing::debug!(group = %name, "deleted address group");
        self.notify_address_group(name);
    }

    /// Replaces (or creates) the group's pod set with the full membership
    /// carried by `group`.
    pub fn add_applied_to_group(&mut self, group: &api::AppliedToGroup) {
        let pods: PodSet = group.pods.iter().map(pod_ref).collect();
        tracing::debug!(group = %group.name, pods = pods.len(), "added applied-to group");
        self.pod_set_by_group.insert(group.name.clone(), pods);
        self.notify_applied_to_group(&group.name);
    }

    /// Applies membership deltas to an existing applied-to group. Same
    /// contract as [`patch_address_group`](Self::patch_address_group).
    pub fn patch_applied_to_group(
        &mut self,
        patch: &api::AppliedToGroupPatch,
    ) -> Result<(), PatchError> {
        let pods = self
            .pod_set_by_group
            .get_mut(&patch.name)
            .ok_or_else(|| PatchError::UnknownAppliedToGroup(patch.name.clone()))?;
        for pod in &patch.removed_pods {
            pods.remove(&pod_ref(pod));
        }
        for pod in &patch.added_pods {
            pods.insert(pod_ref(pod));
        }
        tracing::debug!(group = %patch.name, pods = pods.len(), "patched applied-to group");
        self.notify_applied_to_group(&patch.name);
        Ok(())
    }

    /// Removes the group's pod set, marking every rule that references it
    /// dirty. Deleting an unknown group is a no-op.
    pub fn delete_applied_to_group(&mut self, name: &str) {
        if self.pod_set_by_group.remove(name).is_none() {
            return;
        }
        tracing::debug!(group = %name, "deleted applied-to group");
        self.notify_applied_to_group(name);
    }

    /// Joins a rule with its resolved address and pod sets.
    ///
    /// Address groups resolve on the side the direction makes meaningful:
    /// `from` for inbound rules, `to` for outbound. The untouched side's set
    /// stays empty. Any missing referenced group makes the rule
    /// [`Incomplete`](RuleLookup::Incomplete).
    pub fn get_completed_rule(&self, id: &RuleId) -> RuleLookup {
        let rule = match self.rules.get(id) {
            Some(rule) => rule,
            None => return RuleLookup::Unknown,
        };

        let (from_addresses, to_addresses) = match rule.direction {
            Direction::In => match self.union_address_groups(&rule.from.address_groups) {
                Some(from) => (from, AddressSet::default()),
                None => return RuleLookup::Incomplete,
            },
            Direction::Out => match self.union_address_groups(&rule.to.address_groups) {
                Some(to) => (AddressSet::default(), to),
                None => return RuleLookup::Incomplete,
            },
        };

        let pods = match self.union_applied_to_groups(&rule.applied_to_groups) {
            Some(pods) => pods,
            None => return RuleLookup::Incomplete,
        };

        RuleLookup::Completed(CompletedRule {
            rule: rule.clone(),
            from_addresses,
            to_addresses,
            pods,
        })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn get_rule(&self, id: &RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(id)
    }

    /// Stores a translated rule and links it into all three indices.
    pub(crate) fn insert_rule(&mut self, rule: Arc<Rule>) {
        for group in address_group_keys(&rule) {
            self.rules_by_address_group
                .entry(group.to_string())
                .or_default()
                .insert(rule.id.clone());
        }
        for group in applied_to_group_keys(&rule) {
            self.rules_by_applied_to_group
                .entry(group.to_string())
                .or_default()
                .insert(rule.id.clone());
        }
        self.rules_by_policy
            .entry(rule.policy_uid.clone())
            .or_default()
            .insert(rule.id.clone());
        self.rules.insert(rule.id.clone(), rule);
    }

    fn remove_rule(&mut self, id: &RuleId) {
        let rule = match self.rules.remove(id) {
            Some(rule) => rule,
            None => return,
        };
        for group in address_group_keys(&rule) {
            remove_index_entry(&mut self.rules_by_address_group, group, id);
        }
        for group in applied_to_group_keys(&rule) {
            remove_index_entry(&mut self.rules_by_applied_to_group, group, id);
        }
        remove_index_entry(&mut self.rules_by_policy, &rule.policy_uid, id);
    }

    fn union_address_groups(&self, names: &[String]) -> Option<AddressSet> {
        let mut union = AddressSet::default();
        for name in names {
            let addresses = self.address_set_by_group.get(name)?;
            union.extend(addresses.iter().cloned());
        }
        Some(union)
    }

    fn union_applied_to_groups(&self, names: &[String]) -> Option<PodSet> {
        let mut union = PodSet::default();
        for name in names {
            let pods = self.pod_set_by_group.get(name)?;
            union.extend(pods.iter().cloned());
        }
        Some(union)
    }

    fn notify(&self, ids: HashSet<RuleId>) {
        for id in &ids {
            tracing::trace!(rule = %id, "dirty");
            (self.dirty_rule_handler)(id);
        }
    }

    fn notify_address_group(&self, name: &str) {
        if let Some(ids) = self.rules_by_address_group.get(name) {
            for id in ids {
                tracing::trace!(rule = %id, "dirty");
                (self.dirty_rule_handler)(id);
            }
        }
    }

    fn notify_applied_to_group(&self, name: &str) {
        if let Some(ids) = self.rules_by_applied_to_group.get(name) {
            for id in ids {
                tracing::trace!(rule = %id, "dirty");
                (self.dirty_rule_handler)(id);
            }
        }
    }
}

impl fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCache")
            .field("rules", &self.rules.len())
            .field("address_groups", &self.address_set_by_group.len())
            .field("applied_to_groups", &self.pod_set_by_group.len())
            .field("policies", &self.rules_by_policy.len())
            .finish()
    }
}

// === impl RuleLookup ===

impl RuleLookup {
    /// Whether a rule with the queried ID exists, complete or not.
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn completed(self) -> Option<CompletedRule> {
        match self {
            Self::Completed(rule) => Some(rule),
            _ => None,
        }
    }
}

// === translation ===

/// Pairs one of a policy's rules with the owning policy to produce the rule
/// record the cache stores.
pub(crate) fn to_rule(npr: &api::NetworkPolicyRule, policy: &api::NetworkPolicy) -> Rule {
    Rule {
        id: rule_id(npr, policy),
        direction: direction(npr.direction),
        from: peer(&npr.from),
        to: peer(&npr.to),
        services: npr.services.iter().map(service).collect(),
        applied_to_groups: policy.applied_to_groups.clone(),
        policy_uid: policy.uid.clone(),
    }
}

/// The canonical form a rule ID is derived from. Two (rule, policy) pairs
/// share an ID exactly when these fields serialize byte-equal.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleDigest<'a> {
    direction: api::Direction,
    from: &'a api::NetworkPolicyPeer,
    to: &'a api::NetworkPolicyPeer,
    services: &'a [api::Service],
    applied_to_groups: &'a [String],
    policy_uid: &'a str,
}

fn rule_id(npr: &api::NetworkPolicyRule, policy: &api::NetworkPolicy) -> RuleId {
    let digest = RuleDigest {
        direction: npr.direction,
        from: &npr.from,
        to: &npr.to,
        services: &npr.services,
        applied_to_groups: &policy.applied_to_groups,
        policy_uid: &policy.uid,
    };
    let bytes = serde_json::to_vec(&digest).expect("rule content always serializes");
    let hash = Sha256::digest(&bytes);
    RuleId::from(hex::encode(&hash[..RULE_ID_LENGTH / 2]))
}

fn direction(direction: api::Direction) -> Direction {
    match direction {
        api::Direction::In => Direction::In,
        api::Direction::Out => Direction::Out,
    }
}

fn peer(peer: &api::NetworkPolicyPeer) -> RulePeer {
    RulePeer {
        address_groups: peer.address_groups.clone(),
        ip_blocks: peer.ip_blocks.iter().map(|block| block.cidr).collect(),
    }
}

fn service(service: &api::Service) -> ServicePort {
    ServicePort {
        protocol: service.protocol.map(protocol),
        port: service.port,
    }
}

fn protocol(protocol: api::Protocol) -> Protocol {
    match protocol {
        api::Protocol::Tcp => Protocol::Tcp,
        api::Protocol::Udp => Protocol::Udp,
        api::Protocol::Sctp => Protocol::Sctp,
    }
}

fn pod_ref(pod: &api::PodReference) -> PodRef {
    PodRef::new(&pod.name, &pod.namespace)
}

// === indices ===

/// Index keys for a rule in the address-group index: every address group
/// mentioned by either peer, duplicates collapsed.
pub(crate) fn address_group_keys(rule: &Rule) -> HashSet<&str> {
    rule.from
        .address_groups
        .iter()
        .chain(rule.to.address_groups.iter())
        .map(String::as_str)
        .collect()
}

/// Index keys for a rule in the applied-to-group index.
pub(crate) fn applied_to_group_keys(rule: &Rule) -> HashSet<&str> {
    rule.applied_to_groups.iter().map(String::as_str).collect()
}

fn remove_index_entry(index: &mut HashMap<String, HashSet<RuleId>>, key: &str, id: &RuleId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
