//! Deferred-Action Index
//!
//! Holds actions that arrived while their subscription was reserved and
//! releases them in FIFO arrival order once the reservation clears. The
//! per-id entry is removed the moment its list drains, so the index size
//! tracks subscriptions with actual contention rather than every
//! subscription that ever existed.
//!
//! Freed list containers are recycled through a small free list to bound
//! allocation churn under rapid add/take cycles.

use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::action::Action;
use crate::stats::StatPair;
use crate::subscription::SubscriptionId;

/// Containers kept around for reuse after their list drains
const FREE_LIST_CAP: usize = 20;

#[derive(Default)]
struct DeferredInner {
    waiting: HashMap<SubscriptionId, VecDeque<Action>>,
    free: Vec<VecDeque<Action>>,
    total_deferred: u64,
    total_promoted: u64,
}

/// Per-subscription FIFO lists of actions waiting on a reservation
#[derive(Default)]
pub struct DeferredActions {
    inner: Mutex<DeferredInner>,
}

impl DeferredActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to its subscription's waiting list, creating the
    /// list on first use
    pub fn add(&self, action: Action) {
        let id = action.subscription_id().clone();
        let mut inner = self.inner.lock();
        inner.total_deferred += 1;

        if let Some(list) = inner.waiting.get_mut(&id) {
            list.push_back(action);
            return;
        }

        let mut list = inner.free.pop().unwrap_or_default();
        list.push_back(action);
        inner.waiting.insert(id, list);
    }

    /// Pop the oldest waiting action for the id; drops the per-id entry
    /// once the list is empty
    pub fn take_next(&self, id: &SubscriptionId) -> Option<Action> {
        let mut inner = self.inner.lock();

        let (action, drained) = match inner.waiting.get_mut(id) {
            Some(list) => {
                let action = list.pop_front();
                (action, list.is_empty())
            }
            None => return None,
        };

        if drained {
            if let Some(list) = inner.waiting.remove(id) {
                if inner.free.len() < FREE_LIST_CAP {
                    inner.free.push(list);
                }
            }
        }
        if action.is_some() {
            inner.total_promoted += 1;
        }
        action
    }

    /// Actions currently waiting across all subscriptions
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.values().map(VecDeque::len).sum()
    }

    /// Subscriptions with at least one waiting action
    pub fn contended_subscriptions(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Flatten into the monitoring surface
    pub fn stat_pairs(&self) -> Vec<StatPair> {
        let inner = self.inner.lock();
        let waiting: usize = inner.waiting.values().map(VecDeque::len).sum();
        vec![
            StatPair::new("deferred.waiting", waiting),
            StatPair::new("deferred.subscriptions", inner.waiting.len()),
            StatPair::new("deferred.totalDeferred", inner.total_deferred),
            StatPair::new("deferred.totalPromoted", inner.total_promoted),
        ]
    }
}
