//! Actions: Units of Dispatch Work
//!
//! An `Action` binds one piece of work to a subscription: either "fetch
//! pending notification items" (inbound) or "deliver one notification
//! through a channel" (outbound). Actions are enqueued on exactly one
//! action queue, consumed exactly once per enqueue, and either complete,
//! are dropped, or are handed to the retry scheduler for a delayed
//! re-dispatch of the same value.
//!
//! Resolved connector/adaptor handles are cached on the action so repeated
//! retries do not go back through the registry.

use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::registry::traits::{Adaptor, Connector, NoteItem};
use crate::subscription::{Subscription, SubscriptionId};

/// Classification of an action, used to route it to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Inbound: poll the connector for new notification items
    FetchItems,
    /// Outbound: deliver one notification item through an adaptor
    DeliverItem,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::FetchItems => write!(f, "fetch-items"),
            ActionKind::DeliverItem => write!(f, "deliver-item"),
        }
    }
}

/// Tri-state result of processing one action.
///
/// Anything outside these three, including errors escaping the worker, is
/// treated as fatal by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Work completed; release the reservation and promote deferred work
    Ok,
    /// Transient failure; retry after a delay
    Warning,
    /// Caller-requested redo; retry after a delay
    Reprocess,
}

/// One unit of dispatch work bound to a subscription
#[derive(Clone)]
pub struct Action {
    kind: ActionKind,
    subscription: Subscription,
    /// Adaptor type key for outbound delivery
    adaptor_type: Option<String>,
    /// Item carried by an outbound delivery action
    item: Option<NoteItem>,
    retry_count: u32,
    /// Set when a retry keeps the subscription reservation in flight;
    /// redispatch must then skip `try_reserve`
    holds_reservation: bool,
    connector: Option<Arc<dyn Connector>>,
    adaptor: Option<Arc<dyn Adaptor>>,
}

impl Action {
    /// Create an inbound fetch action for a subscription
    pub fn fetch(subscription: Subscription) -> Self {
        Self {
            kind: ActionKind::FetchItems,
            subscription,
            adaptor_type: None,
            item: None,
            retry_count: 0,
            holds_reservation: false,
            connector: None,
            adaptor: None,
        }
    }

    /// Create an outbound delivery action carrying one item
    pub fn deliver(
        subscription: Subscription,
        adaptor_type: impl Into<String>,
        item: NoteItem,
    ) -> Self {
        Self {
            kind: ActionKind::DeliverItem,
            subscription,
            adaptor_type: Some(adaptor_type.into()),
            item: Some(item),
            retry_count: 0,
            holds_reservation: false,
            connector: None,
            adaptor: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Mutable access for connectors working under the reservation
    pub fn subscription_mut(&mut self) -> &mut Subscription {
        &mut self.subscription
    }

    /// Convenience accessor for the owning subscription id
    pub fn subscription_id(&self) -> &SubscriptionId {
        self.subscription.id()
    }

    /// Adaptor type key for a delivery action
    pub fn adaptor_type(&self) -> Option<&str> {
        self.adaptor_type.as_deref()
    }

    /// Item carried by a delivery action
    pub fn item(&self) -> Option<&NoteItem> {
        self.item.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Incremented by the retry scheduler on each reschedule
    pub(crate) fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn holds_reservation(&self) -> bool {
        self.holds_reservation
    }

    pub(crate) fn set_holds_reservation(&mut self, held: bool) {
        self.holds_reservation = held;
    }

    /// Cached connector handle, if one was resolved earlier
    pub fn cached_connector(&self) -> Option<Arc<dyn Connector>> {
        self.connector.clone()
    }

    pub(crate) fn cache_connector(&mut self, connector: Arc<dyn Connector>) {
        self.connector = Some(connector);
    }

    /// Cached adaptor handle, if one was resolved earlier
    pub fn cached_adaptor(&self) -> Option<Arc<dyn Adaptor>> {
        self.adaptor.clone()
    }

    pub(crate) fn cache_adaptor(&mut self, adaptor: Arc<dyn Adaptor>) {
        self.adaptor = Some(adaptor);
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("subscription", &self.subscription.id())
            .field("adaptor_type", &self.adaptor_type)
            .field("retry_count", &self.retry_count)
            .field("holds_reservation", &self.holds_reservation)
            .field("connector_cached", &self.connector.is_some())
            .field("adaptor_cached", &self.adaptor.is_some())
            .finish()
    }
}
