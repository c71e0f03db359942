//! NetworkPolicy rule cache for the node agent.
//!
//! The central controller computes policy state for each node and
//! disseminates it as three kinds of objects, delivered independently and in
//! any order:
//!
//! - A `NetworkPolicy` carries the policy's rules, which reference address
//!   groups and applied-to groups by name.
//! - An `AddressGroup` names a set of IP endpoints; it is sent in full and
//!   then kept current with incremental patches.
//! - An `AppliedToGroup` names the set of pods a policy applies to, with the
//!   same full-then-patch lifecycle.
//!
//! ```ignore
//! [NetworkPolicy]  ----> [ RuleCache ] --dirty rule IDs--> [ DirtyRuleQueue ]
//! [AddressGroup]   ----/      |                                   |
//! [AppliedToGroup] ---/       +--- get_completed_rule <---- reconciler
//! ```
//!
//! A rule is programmable only once every group it references is known. The
//! cache stores partial state, joins it on demand, and tells the reconciler
//! which rules to re-read by invoking a dirty-rule handler with their IDs.
//! Rules are indexed by the group names they reference, so a group mutation
//! touches exactly the rules that depend on it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod metrics;
mod queue;

pub use self::{
    cache::{DirtyRuleHandler, PatchError, RuleCache, RuleLookup, SharedCache},
    queue::DirtyRuleQueue,
};
