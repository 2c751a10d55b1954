//! Per-Subscription Reservation Table
//!
//! The only cross-cutting serialization point in the engine: at most one
//! active worker per subscription id at any instant. `try_reserve` never
//! blocks; callers that lose the race defer their action instead.
//!
//! Reservation state is held centrally and keyed by id so every holder of
//! a subscription copy observes the same flag.

use std::collections::HashSet;
use parking_lot::Mutex;

use crate::stats::StatPair;
use crate::subscription::SubscriptionId;

/// Exclusive-use reservations keyed by subscription id
#[derive(Debug, Default)]
pub struct ReservationTable {
    reserved: Mutex<HashSet<SubscriptionId>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve the id if currently unreserved. Returns `false`
    /// without blocking when already held.
    pub fn try_reserve(&self, id: &SubscriptionId) -> bool {
        self.reserved.lock().insert(id.clone())
    }

    /// Clear the reservation. This is the trigger point for promoting
    /// deferred work; the caller drains the deferred index afterwards.
    pub fn release(&self, id: &SubscriptionId) {
        if !self.reserved.lock().remove(id) {
            log::debug!("Release of unreserved subscription {}", id);
        }
    }

    /// Whether the id is currently reserved
    pub fn is_reserved(&self, id: &SubscriptionId) -> bool {
        self.reserved.lock().contains(id)
    }

    /// Number of currently reserved subscriptions
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Flatten into the monitoring surface
    pub fn stat_pairs(&self) -> Vec<StatPair> {
        vec![StatPair::new("reservations.held", self.reserved_count())]
    }
}
