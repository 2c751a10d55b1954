//! Connector, Adaptor and Authenticator Capability Traits
//!
//! The calendar wire protocols and the outbound transports live outside
//! this crate. The engine only needs the narrow shapes below: a connector
//! that can report and drain new notification items for a subscription,
//! an adaptor that can deliver one action outbound, and an authenticator
//! that gates inbound callbacks before any action is created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::Action;
use crate::subscription::Subscription;

/// Result type for connector calls
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Result type for adaptor calls
pub type AdaptorResult<T> = Result<T, AdaptorError>;

/// Errors surfaced by connector capabilities.
///
/// Transient errors map onto a retryable `Warning` outcome; fatal errors
/// drop the action.
#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    /// Recoverable failure (network hiccup, remote busy)
    #[error("Transient connector failure: {0}")]
    Transient(String),

    /// Unrecoverable failure for this action
    #[error("Fatal connector failure: {0}")]
    Fatal(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

/// Errors surfaced by adaptor capabilities
#[derive(Debug, Error, Clone)]
pub enum AdaptorError {
    /// Recoverable failure (transport unavailable, rate limited)
    #[error("Transient adaptor failure: {0}")]
    Transient(String),

    /// Unrecoverable failure for this action
    #[error("Fatal adaptor failure: {0}")]
    Fatal(String),
}

impl AdaptorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdaptorError::Transient(_))
    }
}

/// One notification item drained from an inbound source. The engine never
/// interprets the payload; it is carried for the outbound side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteItem {
    /// Connector-scoped item identifier
    pub id: String,

    /// Opaque item payload
    pub payload: serde_json::Value,
}

impl NoteItem {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Inbound notification source capability.
///
/// A connector instance is registered once per type name and shared; all
/// per-subscription state lives in the subscription's property bag, which
/// the connector mutates under the protection of the reservation.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key for this connector type
    fn type_name(&self) -> &str;

    /// Check the source for new notification items
    async fn check(&self, subscription: &mut Subscription) -> ConnectorResult<bool>;

    /// Fetch the next pending item, or `None` when drained
    async fn next_item(&self, subscription: &mut Subscription)
        -> ConnectorResult<Option<NoteItem>>;

    /// Mark an item processed at the source. Returning `false` requests a
    /// redo of the whole fetch pass (`Reprocess`).
    async fn complete_item(
        &self,
        subscription: &mut Subscription,
        item: &NoteItem,
    ) -> ConnectorResult<bool>;

    /// Authenticator used to validate inbound callback tokens
    fn authenticator(&self) -> &dyn Authenticator;
}

/// Outbound delivery capability (email, SMS, ...).
///
/// Returning `false` signals a transient delivery failure that should be
/// retried.
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Registry key for this adaptor type
    fn type_name(&self) -> &str;

    /// Deliver one outbound action
    async fn process(&self, action: &Action) -> AdaptorResult<bool>;
}

/// Validates inbound callback tokens before any action is created
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> bool;
}

/// Authenticator that accepts every token. Useful for sources that carry
/// their own transport-level authentication.
#[derive(Debug, Default)]
pub struct AcceptAllAuthenticator;

impl Authenticator for AcceptAllAuthenticator {
    fn authenticate(&self, _token: &str) -> bool {
        true
    }
}
