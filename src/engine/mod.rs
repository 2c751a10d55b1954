//! Notification Engine
//!
//! The composition root: two bounded action queues with one dedicated
//! dispatch loop each, one shared noteling pool with separate inbound and
//! outbound caps, the per-subscription reservation table, the deferred
//! index, and the retry scheduler, all bound to a single shutdown token.
//!
//! The engine is explicitly constructed and explicitly started; nothing
//! is lazy. `handle_action` is the only intake: callers build an action
//! and the engine routes it to the queue for its kind. Retries re-enter
//! through the same routing path.

pub mod noteling;

pub use noteling::Noteling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionKind};
use crate::config::EngineConfig;
use crate::dispatch::{
    ActionQueue, DeferredActions, DispatchCounters, DispatchLoop, DispatchResult, LoopHealth,
    LoopHealthCell, ReservationTable, RetryScheduler,
};
use crate::pool::{PoolError, ResourcePool};
use crate::registry::Registry;
use crate::stats::StatPair;
use crate::subscription::{SubscriptionId, SubscriptionStore};

const INBOUND_POOL: &str = "inbound";
const OUTBOUND_POOL: &str = "outbound";

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while building or starting an engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed validation
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// The engine was already started
    #[error("Engine is already started")]
    AlreadyStarted,

    /// Worker pool setup failed
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Snapshot of engine liveness
#[derive(Debug, Clone)]
pub struct EngineHealth {
    /// Engine was started and not yet stopped
    pub running: bool,
    pub inbound: LoopHealth,
    pub outbound: LoopHealth,
}

impl EngineHealth {
    /// True when the engine runs and neither dispatch loop has died
    pub fn is_healthy(&self) -> bool {
        self.running
            && self.inbound == LoopHealth::Running
            && self.outbound == LoopHealth::Running
    }
}

/// The notification dispatch engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<Registry>,
    store: Arc<dyn SubscriptionStore>,
    inbound: Arc<ActionQueue>,
    outbound: Arc<ActionQueue>,
    pool: Arc<ResourcePool<Noteling>>,
    reservations: Arc<ReservationTable>,
    deferred: Arc<DeferredActions>,
    retry: RetryScheduler,
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<Action>>>,
    shutdown: CancellationToken,
    inbound_health: LoopHealthCell,
    outbound_health: LoopHealthCell,
    inbound_counters: Arc<DispatchCounters>,
    outbound_counters: Arc<DispatchCounters>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Engine {
    /// Build an engine from a validated configuration, a frozen registry,
    /// and a subscription store. Does not spawn anything.
    pub fn new(
        config: EngineConfig,
        registry: Registry,
        store: Arc<dyn SubscriptionStore>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::InvalidConfig)?;

        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();

        let inbound = Arc::new(ActionQueue::new(
            "inbound",
            config.queue_capacity,
            config.enqueue_timeout(),
            shutdown.clone(),
        ));
        let outbound = Arc::new(ActionQueue::new(
            "outbound",
            config.queue_capacity,
            config.enqueue_timeout(),
            shutdown.clone(),
        ));

        let pool = Arc::new(ResourcePool::new());
        for (key, cap) in [
            (INBOUND_POOL, config.inbound_notelings),
            (OUTBOUND_POOL, config.outbound_notelings),
        ] {
            let registry = Arc::clone(&registry);
            let store = Arc::clone(&store);
            pool.configure(key, cap, move |id| {
                Noteling::new(id, Arc::clone(&registry), Arc::clone(&store))
            })?;
        }

        let (retry, retry_rx) = RetryScheduler::new(config.retry_ceiling, shutdown.clone());

        Ok(Self {
            config,
            registry,
            store,
            inbound,
            outbound,
            pool,
            reservations: Arc::new(ReservationTable::new()),
            deferred: Arc::new(DeferredActions::new()),
            retry,
            retry_rx: Mutex::new(Some(retry_rx)),
            shutdown,
            inbound_health: LoopHealthCell::new(),
            outbound_health: LoopHealthCell::new(),
            inbound_counters: Arc::new(DispatchCounters::default()),
            outbound_counters: Arc::new(DispatchCounters::default()),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn both dispatch loops and the retry router. Starting twice is
    /// an error; a stopped engine cannot be restarted.
    pub fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut tasks = self.tasks.lock();

        for (queue, pool_key, health, counters) in [
            (
                &self.inbound,
                INBOUND_POOL,
                &self.inbound_health,
                &self.inbound_counters,
            ),
            (
                &self.outbound,
                OUTBOUND_POOL,
                &self.outbound_health,
                &self.outbound_counters,
            ),
        ] {
            // Receivers exist until the first start; guarded above
            let rx = match queue.take_receiver() {
                Some(rx) => rx,
                None => return Err(EngineError::AlreadyStarted),
            };
            let dispatch_loop = DispatchLoop::new(
                queue.name(),
                Arc::clone(queue),
                rx,
                Arc::clone(&self.pool),
                pool_key,
                Arc::clone(&self.reservations),
                Arc::clone(&self.deferred),
                self.retry.clone(),
                self.config.acquire_timeout(),
                self.config.retry_delay(),
                self.config.max_consecutive_failures,
                self.shutdown.clone(),
                health.clone(),
                Arc::clone(counters),
            );
            tasks.push(tokio::spawn(dispatch_loop.run()));
        }

        // Retry router: fired retries re-enter through kind-based routing
        let retry_rx = match self.retry_rx.lock().take() {
            Some(rx) => rx,
            None => return Err(EngineError::AlreadyStarted),
        };
        tasks.push(tokio::spawn(Self::route_retries(
            retry_rx,
            Arc::clone(&self.inbound),
            Arc::clone(&self.outbound),
            self.shutdown.clone(),
        )));

        log::info!(
            "Engine started: {} connector types, {} adaptor types, {} + {} notelings",
            self.registry.connector_count(),
            self.registry.adaptor_count(),
            self.config.inbound_notelings,
            self.config.outbound_notelings
        );
        Ok(())
    }

    async fn route_retries(
        mut retry_rx: mpsc::UnboundedReceiver<Action>,
        inbound: Arc<ActionQueue>,
        outbound: Arc<ActionQueue>,
        shutdown: CancellationToken,
    ) {
        loop {
            let action = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = retry_rx.recv() => match next {
                    Some(action) => action,
                    None => break,
                },
            };
            let queue = match action.kind() {
                ActionKind::FetchItems => &inbound,
                ActionKind::DeliverItem => &outbound,
            };
            if let Err(e) = queue.enqueue(action).await {
                log::warn!("Could not re-queue retried action: {}", e);
            }
        }
        log::debug!("Retry router stopped");
    }

    /// Submit an action. Fetch actions go to the inbound queue, delivery
    /// actions to the outbound queue. Blocks (bounded, shutdown-aware)
    /// while the target queue is full.
    pub async fn handle_action(&self, action: Action) -> DispatchResult<()> {
        log::trace!(
            "Routing {} action for subscription {}",
            action.kind(),
            action.subscription_id()
        );
        match action.kind() {
            ActionKind::FetchItems => self.inbound.enqueue(action).await,
            ActionKind::DeliverItem => self.outbound.enqueue(action).await,
        }
    }

    /// Validate an inbound callback token for a connector type
    pub fn authenticate(&self, connector_type: &str, token: &str) -> bool {
        self.registry.authenticate(connector_type, token)
    }

    /// Reserve a subscription for exclusive use outside the dispatch path
    pub fn reserve(&self, id: &SubscriptionId) -> bool {
        self.reservations.try_reserve(id)
    }

    /// Release a reservation taken with [`Engine::reserve`]
    pub fn release(&self, id: &SubscriptionId) {
        self.reservations.release(id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Stop the engine: cancel the shutdown token, give the loops a grace
    /// period to finish their current pass, then wait (bounded) for active
    /// notelings to drain. Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("Engine stop requested again; ignoring");
            return;
        }

        log::info!("Engine stopping");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty() {
            let joined = futures::future::join_all(tasks);
            if tokio::time::timeout(self.config.shutdown_grace(), joined)
                .await
                .is_err()
            {
                log::warn!(
                    "Dispatch loops did not stop within {:?}",
                    self.config.shutdown_grace()
                );
            }
        }

        // Workers released by the loops should already be idle; the bound
        // covers promotions and retry timers still unwinding.
        let deadline = Instant::now() + self.config.drain_wait();
        let mut last_log = Instant::now();
        loop {
            let active = self.pool.total_active();
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                log::warn!("Forcing engine stop with {} notelings still active", active);
                break;
            }
            if last_log.elapsed() >= self.config.drain_log_interval() {
                log::info!("Waiting for {} active notelings to drain", active);
                last_log = Instant::now();
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        log::info!("Engine stopped");
    }

    /// Liveness snapshot covering both dispatch loops
    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            running: self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst),
            inbound: self.inbound_health.get(),
            outbound: self.outbound_health.get(),
        }
    }

    /// Flat name/value snapshot of every subsystem, for monitoring
    pub fn stats(&self) -> Vec<StatPair> {
        let mut pairs = vec![
            StatPair::new("registry.connectors", self.registry.connector_count()),
            StatPair::new("registry.adaptors", self.registry.adaptor_count()),
        ];
        pairs.extend(self.pool.statistics().stat_pairs("pool"));
        pairs.extend(self.inbound.stat_pairs());
        pairs.extend(self.outbound.stat_pairs());
        pairs.extend(self.inbound_counters.stat_pairs("dispatch.inbound"));
        pairs.extend(self.outbound_counters.stat_pairs("dispatch.outbound"));
        pairs.extend(self.retry.stat_pairs());
        pairs.extend(self.reservations.stat_pairs());
        pairs.extend(self.deferred.stat_pairs());
        pairs
    }
}
