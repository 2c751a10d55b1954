//! End-to-End Integration Tests
//!
//! Exercises the full engine pipeline with mock connectors and adaptors:
//! intake through `handle_action`, queue routing, noteling processing,
//! reservation handling with FIFO deferral, and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use noteling::{
    AcceptAllAuthenticator, Action, Adaptor, AdaptorResult, Authenticator, Connector,
    ConnectorResult, DispatchError, Engine, EngineConfig, MemoryStore, NoteItem, Registry,
    Subscription, SubscriptionStore,
};

/// Connector serving a fixed batch of items, drained once
struct BatchConnector {
    auth: AcceptAllAuthenticator,
    items: Mutex<Vec<NoteItem>>,
    checks: AtomicUsize,
}

impl BatchConnector {
    fn new(count: usize) -> Self {
        Self {
            auth: AcceptAllAuthenticator,
            items: Mutex::new(
                (0..count)
                    .map(|i| NoteItem::new(format!("n-{}", i), serde_json::json!({ "seq": i })))
                    .collect(),
            ),
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for BatchConnector {
    fn type_name(&self) -> &str {
        "caldav"
    }

    async fn check(&self, _subscription: &mut Subscription) -> ConnectorResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(!self.items.lock().is_empty())
    }

    async fn next_item(
        &self,
        subscription: &mut Subscription,
    ) -> ConnectorResult<Option<NoteItem>> {
        let item = self.items.lock().pop();
        if let Some(item) = &item {
            subscription.set_properties(serde_json::json!({ "last_fetched": item.id }));
        }
        Ok(item)
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

/// Adaptor recording the order items were delivered in
struct RecordingAdaptor {
    delivered: Mutex<Vec<String>>,
}

impl RecordingAdaptor {
    fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl Adaptor for RecordingAdaptor {
    fn type_name(&self) -> &str {
        "email"
    }

    async fn process(&self, action: &Action) -> AdaptorResult<bool> {
        if let Some(item) = action.item() {
            self.delivered.lock().push(item.id.clone());
        }
        Ok(true)
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        queue_capacity: 32,
        enqueue_timeout_ms: 20,
        inbound_notelings: 2,
        outbound_notelings: 2,
        acquire_timeout_ms: 100,
        retry_delay_ms: 20,
        retry_ceiling: 3,
        shutdown_grace_ms: 1_000,
        drain_wait_ms: 1_000,
        drain_log_interval_ms: 200,
        ..Default::default()
    }
}

struct TestBed {
    engine: Engine,
    connector: Arc<BatchConnector>,
    adaptor: Arc<RecordingAdaptor>,
    store: Arc<MemoryStore>,
}

fn build_engine(item_count: usize) -> TestBed {
    let connector = Arc::new(BatchConnector::new(item_count));
    let adaptor = Arc::new(RecordingAdaptor::new());
    let store = Arc::new(MemoryStore::new());

    let mut registry = Registry::new();
    let connector_handle: Arc<dyn Connector> = connector.clone();
    registry.register_connector(connector_handle).unwrap();
    let adaptor_handle: Arc<dyn Adaptor> = adaptor.clone();
    registry.register_adaptor(adaptor_handle).unwrap();

    let store_handle: Arc<dyn SubscriptionStore> = store.clone();
    let engine = Engine::new(test_config(), registry, store_handle).unwrap();
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

#[tokio::test]
async fn test_fetch_drains_source_and_persists_state() {
    let bed = build_engine(3);
    let sub = Subscription::new("caldav", "/principals/users/fred");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    bed.engine.handle_action(Action::fetch(sub.clone())).await.unwrap();

    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.inbound.completed") == 1).await;
    assert_eq!(bed.connector.checks.load(Ordering::SeqCst), 1);

    // Connector mutations made it through the store boundary
    let persisted = bed.store.get(sub.id()).unwrap();
    assert!(persisted.properties()["last_fetched"].is_string());
    assert_eq!(persisted.error_count(), 0);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_deliveries_route_to_outbound_queue() {
    let bed = build_engine(0);
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    for i in 0..4 {
        let item = NoteItem::new(format!("n-{}", i), serde_json::json!({}));
        bed.engine
            .handle_action(Action::deliver(sub.clone(), "email", item))
            .await
            .unwrap();
    }

    let adaptor = Arc::clone(&bed.adaptor);
    wait_for(|| adaptor.delivered().len() == 4).await;
    assert_eq!(stat(&bed.engine, "dispatch.outbound.completed"), 4);
    assert_eq!(stat(&bed.engine, "dispatch.inbound.dispatched"), 0);
    assert_eq!(stat(&bed.engine, "queue.outbound.enqueued"), 4);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_deferred_actions_promote_in_fifo_order() {
    let bed = build_engine(0);
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();
    bed.engine.start().unwrap();

    // Hold the reservation so everything submitted now must defer
    assert!(bed.engine.reserve(sub.id()));
    for i in 0..3 {
        let item = NoteItem::new(format!("d-{}", i), serde_json::json!({}));
        bed.engine
            .handle_action(Action::deliver(sub.clone(), "email", item))
            .await
            .unwrap();
    }
    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.outbound.deferred") == 3).await;
    assert_eq!(stat(engine, "deferred.waiting"), 3);

    // Release and submit a trigger action. Its completion promotes the
    // oldest deferred action; each completion promotes the next.
    bed.engine.release(sub.id());
    let trigger = NoteItem::new("trigger", serde_json::json!({}));
    bed.engine
        .handle_action(Action::deliver(sub.clone(), "email", trigger))
        .await
        .unwrap();

    let adaptor = Arc::clone(&bed.adaptor);
    wait_for(|| adaptor.delivered().len() == 4).await;
    assert_eq!(bed.adaptor.delivered(), vec!["trigger", "d-0", "d-1", "d-2"]);
    assert_eq!(stat(engine, "deferred.waiting"), 0);
    assert_eq!(stat(engine, "reservations.held"), 0);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_independent_subscriptions_never_defer() {
    let bed = build_engine(0);
    bed.engine.start().unwrap();

    for i in 0..6 {
        let sub = Subscription::new("caldav", format!("/p/{}", i));
        bed.store.add(&sub).await.unwrap();
        let item = NoteItem::new(format!("n-{}", i), serde_json::json!({}));
        bed.engine
            .handle_action(Action::deliver(sub, "email", item))
            .await
            .unwrap();
    }

    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.outbound.completed") == 6).await;
    assert_eq!(stat(engine, "dispatch.outbound.deferred"), 0);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_pool_drains_to_zero_after_work() {
    let bed = build_engine(2);
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    bed.engine.handle_action(Action::fetch(sub)).await.unwrap();

    let engine = &bed.engine;
    wait_for(|| stat(engine, "dispatch.inbound.completed") == 1).await;
    assert_eq!(stat(engine, "pool.active"), 0);
    assert!(stat(engine, "pool.gets") >= 1);

    bed.engine.stop().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let bed = build_engine(0);
    let sub = Subscription::new("caldav", "/p/a");
    bed.store.add(&sub).await.unwrap();

    bed.engine.start().unwrap();
    bed.engine.stop().await;
    bed.engine.stop().await; // idempotent

    let result = bed.engine.handle_action(Action::fetch(sub)).await;
    assert!(matches!(result, Err(DispatchError::ShuttingDown)));
    assert!(!bed.engine.health().running);
}

#[tokio::test]
async fn test_authentication_gates_by_connector_type() {
    let bed = build_engine(0);
    assert!(bed.engine.authenticate("caldav", "any-token"));
    assert!(!bed.engine.authenticate("exchange", "any-token"));
}
