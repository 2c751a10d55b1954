//! Dispatch Loop
//!
//! One dedicated consumer per action queue. Each pass pulls one action,
//! acquires a pooled worker (a capacity-backpressure loop that never
//! discards the action), reserves the subscription or defers the action,
//! invokes processing, and maps the tri-state outcome:
//!
//! - `Ok`: release worker and reservation, promote the next deferred
//!   action for that subscription back onto this queue.
//! - `Warning` / `Reprocess`: release the worker, keep the reservation in
//!   flight, hand the action to the retry scheduler. Abandonment at the
//!   retry ceiling releases the reservation here.
//! - Fatal: drop the action; worker and reservation are still released.
//!
//! Individual action failures are isolated. A consecutive-failure circuit
//! breaker terminates the loop and records a `Dead` health state the
//! engine can observe; the loop never restarts itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ProcessOutcome};
use crate::dispatch::deferred::DeferredActions;
use crate::dispatch::queue::ActionQueue;
use crate::dispatch::reservation::ReservationTable;
use crate::dispatch::retry::{RetryScheduler, Schedule};
use crate::pool::{Acquire, ResourcePool};
use crate::stats::StatPair;

/// Fatal processing failure. Everything a worker cannot express as one of
/// the three outcomes collapses into this.
#[derive(Debug, Error, Clone)]
#[error("Fatal processing failure: {0}")]
pub struct ProcessFailure(pub String);

/// Result of processing one action
pub type ProcessResult = Result<ProcessOutcome, ProcessFailure>;

/// Processing entry point implemented by pooled workers
#[async_trait]
pub trait ActionProcessor: Send + Sync {
    async fn process(&self, action: &mut Action) -> ProcessResult;
}

/// Health of one dispatch loop, observable from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopHealth {
    NotStarted,
    Running,
    /// Clean exit after a shutdown request or queue closure
    Stopped,
    /// Circuit breaker tripped; supervision must decide what to do
    Dead { cause: String },
}

/// Shared health cell written by the loop and read by the engine
#[derive(Clone)]
pub struct LoopHealthCell {
    state: Arc<Mutex<LoopHealth>>,
}

impl LoopHealthCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopHealth::NotStarted)),
        }
    }

    pub fn get(&self) -> LoopHealth {
        self.state.lock().clone()
    }

    fn set(&self, health: LoopHealth) {
        *self.state.lock() = health;
    }

    pub fn is_running(&self) -> bool {
        matches!(self.get(), LoopHealth::Running)
    }
}

impl Default for LoopHealthCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-loop dispatch counters
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub retried: AtomicU64,
    pub dropped: AtomicU64,
    pub deferred: AtomicU64,
}

impl DispatchCounters {
    pub fn stat_pairs(&self, prefix: &str) -> Vec<StatPair> {
        vec![
            StatPair::new(
                format!("{}.dispatched", prefix),
                self.dispatched.load(Ordering::Relaxed),
            ),
            StatPair::new(
                format!("{}.completed", prefix),
                self.completed.load(Ordering::Relaxed),
            ),
            StatPair::new(
                format!("{}.retried", prefix),
                self.retried.load(Ordering::Relaxed),
            ),
            StatPair::new(
                format!("{}.dropped", prefix),
                self.dropped.load(Ordering::Relaxed),
            ),
            StatPair::new(
                format!("{}.deferred", prefix),
                self.deferred.load(Ordering::Relaxed),
            ),
        ]
    }
}

/// The consumer loop for one action queue
pub struct DispatchLoop<P: ActionProcessor + 'static> {
    name: String,
    queue: Arc<ActionQueue>,
    rx: mpsc::Receiver<Action>,
    pool: Arc<ResourcePool<P>>,
    pool_key: String,
    reservations: Arc<ReservationTable>,
    deferred: Arc<DeferredActions>,
    retry: RetryScheduler,
    acquire_timeout: Duration,
    retry_delay: Duration,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    shutdown: CancellationToken,
    health: LoopHealthCell,
    counters: Arc<DispatchCounters>,
}

impl<P: ActionProcessor + 'static> DispatchLoop<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        queue: Arc<ActionQueue>,
        rx: mpsc::Receiver<Action>,
        pool: Arc<ResourcePool<P>>,
        pool_key: impl Into<String>,
        reservations: Arc<ReservationTable>,
        deferred: Arc<DeferredActions>,
        retry: RetryScheduler,
        acquire_timeout: Duration,
        retry_delay: Duration,
        max_consecutive_failures: u32,
        shutdown: CancellationToken,
        health: LoopHealthCell,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            rx,
            pool,
            pool_key: pool_key.into(),
            reservations,
            deferred,
            retry,
            acquire_timeout,
            retry_delay,
            max_consecutive_failures,
            consecutive_failures: 0,
            shutdown,
            health,
            counters,
        }
    }

    /// Run the consumer loop until shutdown, queue closure, or the
    /// consecutive-failure circuit breaker trips.
    pub async fn run(mut self) {
        log::info!("Dispatch loop '{}' started", self.name);
        self.health.set(LoopHealth::Running);

        loop {
            let action = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(action) => action,
                    None => break,
                },
            };

            self.dispatch_one(action).await;

            if self.consecutive_failures > self.max_consecutive_failures {
                let cause = format!(
                    "{} consecutive dispatch failures (threshold {})",
                    self.consecutive_failures, self.max_consecutive_failures
                );
                log::error!("Dispatch loop '{}' terminating: {}", self.name, cause);
                self.health.set(LoopHealth::Dead { cause });
                return;
            }
        }

        log::info!("Dispatch loop '{}' stopped", self.name);
        self.health.set(LoopHealth::Stopped);
    }

    /// One full pass for one action
    async fn dispatch_one(&mut self, mut action: Action) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        // Acquire a pooled worker. Timeouts here are capacity backpressure,
        // not failures: loop again without discarding the action.
        let entry = loop {
            if self.shutdown.is_cancelled() {
                log::debug!(
                    "Dispatch loop '{}' abandoning action for {} at shutdown",
                    self.name,
                    action.subscription_id()
                );
                return;
            }
            match self.pool.acquire(&self.pool_key, self.acquire_timeout).await {
                Ok(Acquire::Acquired(entry)) => break entry,
                Ok(Acquire::Timeout) => {
                    log::trace!("Dispatch loop '{}' waiting for a free worker", self.name);
                }
                Err(e) => {
                    // Misconfigured pool; systemic, counts against the breaker
                    log::error!("Dispatch loop '{}' pool failure: {}", self.name, e);
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    self.consecutive_failures += 1;
                    return;
                }
            }
        };

        let id = action.subscription_id().clone();

        // Retried actions kept their reservation in flight; fresh actions
        // must win it or defer.
        if !action.holds_reservation() && !self.reservations.try_reserve(&id) {
            log::debug!(
                "Subscription {} reserved; deferring {} action",
                id,
                action.kind()
            );
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
            self.deferred.add(action);
            self.pool.release(entry);
            return;
        }

        let result = entry.resource().process(&mut action).await;
        self.pool.release(entry);

        match result {
            Ok(ProcessOutcome::Ok) => {
                self.consecutive_failures = 0;
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.reservations.release(&id);
                self.promote_deferred(&id);
            }
            Ok(outcome @ (ProcessOutcome::Warning | ProcessOutcome::Reprocess)) => {
                self.consecutive_failures = 0;
                log::debug!(
                    "{:?} outcome for subscription {}; scheduling retry {}",
                    outcome,
                    id,
                    action.retry_count() + 1
                );
                // Reservation stays in flight so a second trigger cannot
                // race the retry
                action.set_holds_reservation(true);
                match self.retry.schedule_after(action, self.retry_delay) {
                    Schedule::Scheduled => {
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    }
                    Schedule::Abandoned => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        self.reservations.release(&id);
                        self.promote_deferred(&id);
                    }
                }
            }
            Err(failure) => {
                log::error!(
                    "Dropping action for subscription {}: {}",
                    id,
                    failure
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.reservations.release(&id);
                self.promote_deferred(&id);
                self.consecutive_failures += 1;
            }
        }
    }

    /// Promote the oldest deferred action for the id back onto this queue.
    /// Runs as its own task so a full queue cannot wedge the consumer.
    fn promote_deferred(&self, id: &crate::subscription::SubscriptionId) {
        if let Some(next) = self.deferred.take_next(id) {
            log::debug!("Promoting deferred action for subscription {}", id);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                if let Err(e) = queue.enqueue(next).await {
                    log::warn!("Could not promote deferred action: {}", e);
                }
            });
        }
    }
}
