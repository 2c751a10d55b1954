//! Bounded Action Queue
//!
//! Single bounded queue feeding one dedicated dispatch loop. Enqueue is a
//! timeout-bounded send retried in a loop bounded by the shutdown token:
//! work is never silently dropped and callers never block past a shutdown
//! request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::dispatch::error::{DispatchError, DispatchResult};
use crate::stats::StatPair;

/// Bounded FIFO queue of actions with a single consumer
pub struct ActionQueue {
    name: String,
    capacity: usize,
    enqueue_timeout: Duration,
    tx: mpsc::Sender<Action>,
    rx: Mutex<Option<mpsc::Receiver<Action>>>,
    shutdown: CancellationToken,
    total_enqueued: AtomicU64,
    enqueue_retries: AtomicU64,
}

impl ActionQueue {
    /// Create a queue bound to the given shutdown token
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        enqueue_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            capacity,
            enqueue_timeout,
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown,
            total_enqueued: AtomicU64::new(0),
            enqueue_retries: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push an action, retrying bounded sends while the queue is full.
    /// Returns `ShuttingDown` once shutdown is requested instead of
    /// blocking forever.
    pub async fn enqueue(&self, action: Action) -> DispatchResult<()> {
        let mut action = action;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(DispatchError::ShuttingDown);
            }

            match self.tx.send_timeout(action, self.enqueue_timeout).await {
                Ok(()) => {
                    self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    self.enqueue_retries.fetch_add(1, Ordering::Relaxed);
                    log::trace!("Queue '{}' full; retrying enqueue", self.name);
                    action = returned;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    return Err(DispatchError::QueueClosed(self.name.clone()));
                }
            }
        }
    }

    /// Hand the receiving end to the dispatch loop. Can only be taken
    /// once; the queue has exactly one consumer.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<Action>> {
        self.rx.lock().take()
    }

    /// Number of actions currently queued
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    /// Flatten into the monitoring surface
    pub fn stat_pairs(&self) -> Vec<StatPair> {
        let prefix = format!("queue.{}", self.name);
        vec![
            StatPair::new(format!("{}.depth", prefix), self.depth()),
            StatPair::new(format!("{}.capacity", prefix), self.capacity),
            StatPair::new(
                format!("{}.enqueued", prefix),
                self.total_enqueued.load(Ordering::Relaxed),
            ),
            StatPair::new(
                format!("{}.enqueueRetries", prefix),
                self.enqueue_retries.load(Ordering::Relaxed),
            ),
        ]
    }
}
