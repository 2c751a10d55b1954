//! Error Recovery Integration Tests
//!
//! Verifies failure isolation and the retry machinery end to end:
//! transient failures recover through delayed retries, the ceiling bounds
//! total attempts and releases the reservation, fatal failures drop one
//! action without affecting the rest, and the consecutive-failure breaker
//! marks a dispatch loop dead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use noteling::{
    AcceptAllAuthenticator, Action, Adaptor, AdaptorError, AdaptorResult, Authenticator,
    Connector, ConnectorResult, Engine, EngineConfig, LoopHealth, MemoryStore, NoteItem,
    Registry, Subscription, SubscriptionStore,
};

/// Connector that reports nothing new; fetch tests only exercise the
/// persistence path around it.
struct QuietConnector {
    auth: AcceptAllAuthenticator,
    checks: AtomicUsize,
}

impl QuietConnector {
    fn new() -> Self {
        Self {
            auth: AcceptAllAuthenticator,
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for QuietConnector {
    fn type_name(&self) -> &str {
        "caldav"
    }

    async fn check(&self, _subscription: &mut Subscription) -> ConnectorResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    async fn next_item(
        &self,
        _subscription: &mut Subscription,
    ) -> ConnectorResult<Option<NoteItem>> {
        Ok(None)
    }

    async fn complete_item(
        &self,
        _subscription: &mut Subscription,
        _item: &NoteItem,
    ) -> ConnectorResult<bool> {
        Ok(true)
    }

    fn authenticator(&self) -> &dyn Authenticator {
        &self.auth
    }
}

/// Adaptor scripted with a result sequence; defaults to success once the
/// script is exhausted
struct ScriptedAdaptor {
    script: Mutex<Vec<AdaptorResult<bool>>>,
    calls: AtomicUsize,
}

impl ScriptedAdaptor {
    fn new(script: Vec<AdaptorResult<bool>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adaptor for ScriptedAdaptor {
    fn type_name(&self) -> &str {
        "email"
    }

    async fn process(&self, _action: &Action) -> AdaptorResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        if script.is_empty() {
            Ok(true)
        } else {
            script.remove(0)
        }
    }
}

fn test_config(retry_ceiling: u32, max_consecutive_failures: u32) -> EngineConfig {
    EngineConfig {
        queue_capacity: 32,
        enqueue_timeout_ms: 20,
        inbound_notelings: 2,
        outbound_notelings: 2,
        acquire_timeout_ms: 100,
        retry_delay_ms: 30,
        retry_ceiling,
        max_consecutive_failures,
        shutdown_grace_ms: 1_000,
        drain_wait_ms: 1_000,
        drain_log_interval_ms: 200,
    }
}

struct TestBed {
    engine: Engine,
    connector: Arc<QuietConnector>,
    adaptor: Arc<ScriptedAdaptor>,
    store: Arc<MemoryStore>,
}

fn build_engine(
    script: Vec<AdaptorResult<bool>>,
    retry_ceiling: u32,
    max_consecutive_failures: u32,
) -> TestBed {
    let connector = Arc::new(QuietConnector::new());
    let adaptor = Arc::new(ScriptedAdaptor::new(script));
    let store = Arc::new(MemoryStore::new());

    let mut registry = Registry::new();
    let connector_handle: Arc<dyn Connector> = connector.clone();
    registry.register_connector(connector_handle).unwrap();
    let adaptor_handle: Arc<dyn Adaptor> = adaptor.clone();
    registry.register_adaptor(adaptor_handle).unwrap();

    let store_handle: Arc<dyn SubscriptionStore> = store.clone();
    let engine = Engine::new(
        test_config(retry_ceiling, max_consecutive_failures),
        registry,
        store_handle,
    )
    .unwrap();
    TestBed {
        engine,
        connector,
        adaptor,
        store,
    }
}

fn stat(engine: &Engine, name: &str) -> u64 {
    engine
        .stats()
        .into_iter()
        .find(|p| p.name == name)
        .and_then(|p| p.value.parse().ok())
        .unwrap_or_else(|| panic!("missing stat {}", name))
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn delivery(bed: &TestBed, sub: &Subscription, item_id: &str) {
    let item = NoteItem::new(item_id, serde_json::json!({}));
    bed.engine
        .handle_action(Action::deliver(sub.clone(), "email", item))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transient_failures_recover_through_retries() {
    let bed = build_engine(
        vec![
            Err(AdaptorError::Transient("smtp busy".to_string())),
            Err(AdaptorError::Transient("smtp busy".to_string())),
        ],
        5,
        10,
    );
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    delivery(&bed, &sub, "n-1").await;

    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.outbound.completed") == 1).await;
    // One initial dispatch plus two retries
    assert_eq!(bed.adaptor.calls(), 3);
    assert_eq!(stat(engine, "retry.fired"), 2);
    assert_eq!(stat(engine, "retry.abandoned"), 0);
    assert_eq!(stat(engine, "reservations.held"), 0);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_retry_ceiling_bounds_total_attempts() {
    // Delivery refusals map to Warning forever; ceiling 2 allows exactly
    // one initial attempt plus two retries
    let bed = build_engine(
        vec![Ok(false), Ok(false), Ok(false), Ok(false), Ok(false)],
        2,
        10,
    );
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    delivery(&bed, &sub, "n-1").await;

    let engine = &bed.engine;
    wait_for(|| stat(engine, "retry.abandoned") == 1).await;
    assert_eq!(bed.adaptor.calls(), 3);
    // Two reschedules and one abandonment-drop, counted disjointly
    assert_eq!(stat(engine, "dispatch.outbound.retried"), 2);
    assert_eq!(stat(engine, "dispatch.outbound.dropped"), 1);

    // Abandonment released the reservation
    wait_for(|| stat(engine, "reservations.held") == 0).await;
    assert!(bed.engine.reserve(sub.id()));

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_reservation_held_while_retry_pending() {
    let bed = build_engine(vec![Ok(false)], 5, 10);
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    delivery(&bed, &sub, "first").await;

    // While the retry timer runs the reservation stays in flight, so a
    // second action for the same subscription must defer
    let engine = &bed.engine;
    wait_for(|| stat(engine, "retry.waiting") == 1).await;
    assert_eq!(stat(engine, "reservations.held"), 1);

    delivery(&bed, &sub, "second").await;
    wait_for(|| stat(engine, "dispatch.outbound.deferred") == 1).await;

    // Retry succeeds, promotion drains the deferred action
    wait_for(|| stat(engine, "dispatch.outbound.completed") == 2).await;
    assert_eq!(stat(engine, "deferred.waiting"), 0);
    assert_eq!(stat(engine, "reservations.held"), 0);
    assert_eq!(bed.adaptor.calls(), 3);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_fatal_failure_drops_one_action_only() {
    let bed = build_engine(
        vec![Err(AdaptorError::Fatal("malformed payload".to_string()))],
        5,
        10,
    );
    let sub_a = Subscription::new("caldav", "/p/a");
    let sub_b = Subscription::new("caldav", "/p/b");
    bed.store.add(&sub_a).await.unwrap();
    bed.store.add(&sub_b).await.unwrap();

    bed.engine.start().unwrap();
    delivery(&bed, &sub_a, "bad").await;
    delivery(&bed, &sub_b, "good").await;

    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.outbound.completed") == 1).await;
    assert_eq!(stat(engine, "dispatch.outbound.dropped"), 1);
    assert_eq!(stat(engine, "retry.scheduled"), 0);

    // The dropped action released its reservation and the loop survived
    assert!(bed.engine.reserve(sub_a.id()));
    assert!(bed.engine.health().is_healthy());

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_consecutive_failures_kill_the_loop() {
    let always_fatal: Vec<AdaptorResult<bool>> = (0..6)
        .map(|i| Err(AdaptorError::Fatal(format!("failure {}", i))))
        .collect();
    let bed = build_engine(always_fatal, 5, 2);
    bed.engine.start().unwrap();

    for i in 0..4 {
        let sub = Subscription::new("caldav", format!("/p/{}", i));
        bed.store.add(&sub).await.unwrap();
        delivery(&bed, &sub, "n").await;
    }

    let engine = &bed.engine;
    wait_for(|| matches!(engine.health().outbound, LoopHealth::Dead { .. })).await;
    assert!(!bed.engine.health().is_healthy());
    // The inbound loop is unaffected
    assert_eq!(bed.engine.health().inbound, LoopHealth::Running);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_store_failure_surfaces_as_retryable_warning() {
    let bed = build_engine(vec![], 1, 10);
    // Deliberately not added to the store: persisting after the fetch
    // pass fails, which must be retryable rather than fatal
    let sub = Subscription::new("caldav", "/p/missing");

    bed.engine.start().unwrap();
    bed.engine.handle_action(Action::fetch(sub)).await.unwrap();

    let engine = &bed.engine;
    wait_for(|| stat(engine, "retry.abandoned") == 1).await;
    // Initial attempt plus one retry, both hitting the store failure
    assert_eq!(bed.connector.checks.load(Ordering::SeqCst), 2);
    assert_eq!(stat(engine, "dispatch.inbound.completed"), 0);

    bed.engine.stop().await;
}
