//! Retry Scheduler
//!
//! Reintroduces a failed-but-retryable action to the engine's routing
//! path after a delay, bounded by a hard retry ceiling. At the ceiling the
//! action is abandoned: no reschedule, no error, one loud log line and a
//! counter. Timers are independent one-shot tasks; none blocks another.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::stats::StatPair;
use crate::subscription::SubscriptionId;

/// Outcome of a schedule request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A one-shot timer was registered
    Scheduled,
    /// The retry ceiling was reached; the action will not run again.
    /// The caller is responsible for releasing its reservation.
    Abandoned,
}

struct RetryInner {
    resubmit: mpsc::UnboundedSender<Action>,
    /// Pending timer count per subscription id, for observability
    pending: DashMap<SubscriptionId, u32>,
    waiting: AtomicUsize,
    max_waiting: AtomicUsize,
    total_scheduled: AtomicU64,
    total_fired: AtomicU64,
    total_abandoned: AtomicU64,
    retry_ceiling: u32,
    shutdown: CancellationToken,
}

impl RetryInner {
    fn decrement(&self, id: &SubscriptionId) {
        if let Some(mut count) = self.pending.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                drop(count);
                self.pending.remove_if(id, |_, c| *c == 0);
            }
        }
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Delay-based re-submission of retryable actions
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<RetryInner>,
}

impl RetryScheduler {
    /// Create a scheduler bound to the shutdown token. The returned
    /// receiver carries fired actions back to the engine's routing path.
    pub fn new(
        retry_ceiling: u32,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(RetryInner {
                resubmit: tx,
                pending: DashMap::new(),
                waiting: AtomicUsize::new(0),
                max_waiting: AtomicUsize::new(0),
                total_scheduled: AtomicU64::new(0),
                total_fired: AtomicU64::new(0),
                total_abandoned: AtomicU64::new(0),
                retry_ceiling,
                shutdown,
            }),
        };
        (scheduler, rx)
    }

    /// Register a one-shot timer that resubmits the action after `delay`,
    /// or abandon it when the retry budget is spent.
    pub fn schedule_after(&self, mut action: Action, delay: Duration) -> Schedule {
        let id = action.subscription_id().clone();

        if action.retry_count() >= self.inner.retry_ceiling {
            self.inner.total_abandoned.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Abandoning {} action for subscription {} after {} retries (ceiling {})",
                action.kind(),
                id,
                action.retry_count(),
                self.inner.retry_ceiling
            );
            return Schedule::Abandoned;
        }

        action.increment_retry();
        *self.inner.pending.entry(id.clone()).or_insert(0) += 1;
        let waiting = self.inner.waiting.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.max_waiting.fetch_max(waiting, Ordering::Relaxed);
        self.inner.total_scheduled.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "Scheduled retry {} for subscription {} in {:?}",
            action.retry_count(),
            id,
            delay
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    inner.decrement(&id);
                }
                _ = tokio::time::sleep(delay) => {
                    inner.decrement(&id);
                    inner.total_fired.fetch_add(1, Ordering::Relaxed);
                    if inner.resubmit.send(action).is_err() {
                        log::warn!("Retry fired for subscription {} after engine stopped", id);
                    }
                }
            }
        });

        Schedule::Scheduled
    }

    /// Number of retries currently waiting on a timer
    pub fn waiting_count(&self) -> usize {
        self.inner.waiting.load(Ordering::Relaxed)
    }

    /// High-water mark of concurrently waiting retries
    pub fn max_waiting(&self) -> usize {
        self.inner.max_waiting.load(Ordering::Relaxed)
    }

    /// Pending timer count for one subscription
    pub fn pending_for(&self, id: &SubscriptionId) -> u32 {
        self.inner.pending.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Flatten into the monitoring surface
    pub fn stat_pairs(&self) -> Vec<StatPair> {
        vec![
            StatPair::new("retry.waiting", self.waiting_count()),
            StatPair::new("retry.maxWaiting", self.max_waiting()),
            StatPair::new(
                "retry.scheduled",
                self.inner.total_scheduled.load(Ordering::Relaxed),
            ),
            StatPair::new("retry.fired", self.inner.total_fired.load(Ordering::Relaxed)),
            StatPair::new(
                "retry.abandoned",
                self.inner.total_abandoned.load(Ordering::Relaxed),
            ),
        ]
    }
}
