//! Subscription Model and Persistence Boundary
//!
//! A `Subscription` identifies one end of a notification relationship: a
//! principal subscribed to an external notification source through a named
//! connector type. The engine never interprets the connector-specific
//! property bag; connectors read and mutate it under the protection of the
//! subscription's reservation and the engine persists the result through
//! the [`SubscriptionStore`] boundary.
//!
//! Reservation state deliberately does not live on this value. Copies of a
//! `Subscription` travel inside actions, so the exclusive-use flag is held
//! centrally in the dispatch layer's reservation table, keyed by id.

use std::fmt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for subscription store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the persistence boundary
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// No subscription matched the query
    #[error("Subscription not found: {0}")]
    NotFound(String),

    /// A subscription with the same id already exists
    #[error("Subscription already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure, assumed transient
    #[error("Subscription store failure: {0}")]
    Backend(String),
}

/// Opaque unique subscription identifier, generated once and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One end of a notification relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier, immutable after creation
    id: SubscriptionId,

    /// Registry key of the connector that owns this subscription
    connector_type: String,

    /// Owning principal
    principal_href: String,

    /// Consecutive-failure counter
    error_count: u32,

    /// Soft-delete flag; the store performs the actual delete
    deleted: bool,

    /// Connector-specific serialized state (sync tokens, pending items).
    /// Opaque to the engine.
    properties: serde_json::Value,

    /// Creation timestamp
    created_at: DateTime<Utc>,

    /// Last mutation timestamp
    updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a new subscription for a principal on the given connector type
    pub fn new(connector_type: impl Into<String>, principal_href: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::generate(),
            connector_type: connector_type.into(),
            principal_href: principal_href.into(),
            error_count: 0,
            deleted: false,
            properties: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    pub fn principal_href(&self) -> &str {
        &self.principal_href
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Record a consecutive processing failure
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        self.updated_at = Utc::now();
    }

    /// Clear the consecutive-failure counter after a successful pass
    pub fn clear_errors(&mut self) {
        self.error_count = 0;
        self.updated_at = Utc::now();
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Mark the subscription logically removed; the store deletes it
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.updated_at = Utc::now();
    }

    /// Connector-specific property bag (opaque to the engine)
    pub fn properties(&self) -> &serde_json::Value {
        &self.properties
    }

    /// Replace the connector-specific property bag
    pub fn set_properties(&mut self, properties: serde_json::Value) {
        self.properties = properties;
        self.updated_at = Utc::now();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Persistence boundary for subscriptions.
///
/// The engine calls this only to resolve a subscription before reservation
/// and to persist state a connector changed during processing. Transactional
/// semantics belong to the implementation, not the engine.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Find a subscription by connector type and owning principal
    async fn find(&self, connector_type: &str, principal_href: &str)
        -> StoreResult<Subscription>;

    /// Persist a new subscription
    async fn add(&self, subscription: &Subscription) -> StoreResult<()>;

    /// Persist changes to an existing subscription
    async fn update(&self, subscription: &Subscription) -> StoreResult<()>;

    /// Remove a subscription
    async fn delete(&self, id: &SubscriptionId) -> StoreResult<()>;
}

/// In-memory subscription store.
///
/// Intended for embedding applications that keep subscription state
/// elsewhere and only need the engine to run, and for tests. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: parking_lot::RwLock<std::collections::HashMap<SubscriptionId, Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Look up a subscription by id
    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions.read().get(id).cloned()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find(
        &self,
        connector_type: &str,
        principal_href: &str,
    ) -> StoreResult<Subscription> {
        self.subscriptions
            .read()
            .values()
            .find(|s| {
                s.connector_type() == connector_type
                    && s.principal_href() == principal_href
                    && !s.is_deleted()
            })
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("{} for {}", connector_type, principal_href))
            })
    }

    async fn add(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(subscription.id()) {
            return Err(StoreError::AlreadyExists(subscription.id().to_string()));
        }
        subscriptions.insert(subscription.id().clone(), subscription.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut subscriptions = self.subscriptions.write();
        if !subscriptions.contains_key(subscription.id()) {
            return Err(StoreError::NotFound(subscription.id().to_string()));
        }
        subscriptions.insert(subscription.id().clone(), subscription.clone());
        Ok(())
    }

    async fn delete(&self, id: &SubscriptionId) -> StoreResult<()> {
        self.subscriptions
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
