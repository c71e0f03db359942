use crate::DirtyRuleHandler;
use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use policy_agent_core::RuleId;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Notify;

/// An unbounded work queue of dirty rule IDs that coalesces duplicates.
///
/// The cache invokes its dirty handler while holding its write lock, so the
/// producing side ([`push`](Self::push)) never blocks and takes no other
/// locks. A reconciler drains the queue with [`recv`](Self::recv); an ID
/// pushed again before it has been popped is delivered once, which is what
/// lets the reconciler absorb bursts of redundant dirty marks.
///
/// Clones share the same queue.
#[derive(Clone, Debug, Default)]
pub struct DirtyRuleQueue(Arc<Inner>);

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    order: VecDeque<RuleId>,
    queued: HashSet<RuleId>,
}

// === impl DirtyRuleQueue ===

impl DirtyRuleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapts the queue into the handler the cache is constructed with.
    pub fn handler(&self) -> DirtyRuleHandler {
        let queue = self.clone();
        Box::new(move |id| queue.push(id))
    }

    /// Enqueues an ID unless it is already pending.
    pub fn push(&self, id: &RuleId) {
        let mut state = self.0.state.lock();
        if state.queued.insert(id.clone()) {
            state.order.push_back(id.clone());
            self.0.notify.notify_one();
        }
    }

    /// Pops the oldest pending ID, if any.
    pub fn try_pop(&self) -> Option<RuleId> {
        let mut state = self.0.state.lock();
        let id = state.order.pop_front()?;
        state.queued.remove(&id);
        Some(id)
    }

    /// Waits until an ID is pending and pops it.
    pub async fn recv(&self) -> RuleId {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.0.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.state.lock().order.is_empty()
    }
}
