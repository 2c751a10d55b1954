//! Noteling Worker
//!
//! A noteling is one pooled worker handle: it performs the actual
//! connector or adaptor call for one action and maps every failure mode
//! onto the outcome tri-state. Transient capability failures become
//! `Warning`, a connector's redo request becomes `Reprocess`, and
//! everything else is fatal and surfaces as a `ProcessFailure`.
//!
//! Notelings resolve the connector/adaptor through the registry once and
//! cache the handle on the action, so retries skip the lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;

use crate::action::{Action, ActionKind, ProcessOutcome};
use crate::dispatch::{ActionProcessor, ProcessFailure, ProcessResult};
use crate::registry::traits::{Adaptor, Connector};
use crate::registry::Registry;
use crate::subscription::SubscriptionStore;

/// Pooled worker that drives one action through its capability calls
pub struct Noteling {
    id: u64,
    registry: Arc<Registry>,
    store: Arc<dyn SubscriptionStore>,
    processed: AtomicU64,
}

impl Noteling {
    pub fn new(id: u64, registry: Arc<Registry>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            id,
            registry,
            store,
            processed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Actions this worker has processed over its lifetime
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn resolve_connector(&self, action: &mut Action) -> Result<Arc<dyn Connector>, ProcessFailure> {
        if let Some(connector) = action.cached_connector() {
            return Ok(connector);
        }
        let connector = self
            .registry
            .connector(action.subscription().connector_type())
            .map_err(|e| ProcessFailure(e.to_string()))?;
        action.cache_connector(Arc::clone(&connector));
        Ok(connector)
    }

    fn resolve_adaptor(&self, action: &mut Action) -> Result<Arc<dyn Adaptor>, ProcessFailure> {
        if let Some(adaptor) = action.cached_adaptor() {
            return Ok(adaptor);
        }
        let type_name = action
            .adaptor_type()
            .ok_or_else(|| ProcessFailure("Delivery action without an adaptor type".to_string()))?
            .to_string();
        let adaptor = self
            .registry
            .adaptor(&type_name)
            .map_err(|e| ProcessFailure(e.to_string()))?;
        action.cache_adaptor(Arc::clone(&adaptor));
        Ok(adaptor)
    }

    /// Drive a fetch pass: check the source, then drain and complete
    /// pending items until done, redo-requested, or a transient failure.
    async fn fetch(&self, action: &mut Action) -> ProcessResult {
        let connector = self.resolve_connector(action)?;
        let subscription = action.subscription_mut();

        let has_new = match connector.check(subscription).await {
            Ok(has_new) => has_new,
            Err(e) if e.is_transient() => {
                log::warn!(
                    "Noteling {}: transient check failure for {}: {}",
                    self.id,
                    subscription.id(),
                    e
                );
                return Ok(ProcessOutcome::Warning);
            }
            Err(e) => return Err(ProcessFailure(e.to_string())),
        };

        let mut outcome = ProcessOutcome::Ok;

        if has_new {
            loop {
                let item = match connector.next_item(subscription).await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(e) if e.is_transient() => {
                        outcome = ProcessOutcome::Warning;
                        break;
                    }
                    Err(e) => return Err(ProcessFailure(e.to_string())),
                };

                match connector.complete_item(subscription, &item).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // Connector wants the whole pass redone
                        outcome = ProcessOutcome::Reprocess;
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        outcome = ProcessOutcome::Warning;
                        break;
                    }
                    Err(e) => return Err(ProcessFailure(e.to_string())),
                }
            }
        }

        if outcome == ProcessOutcome::Ok {
            subscription.clear_errors();
        } else {
            subscription.record_error();
        }

        // Persist whatever the connector changed (sync tokens, pending
        // lists). A store hiccup is retryable, not fatal.
        if let Err(e) = self.store.update(subscription).await {
            log::warn!(
                "Noteling {}: failed to persist subscription {}: {}",
                self.id,
                subscription.id(),
                e
            );
            return Ok(ProcessOutcome::Warning);
        }

        Ok(outcome)
    }

    /// Drive one outbound delivery through the adaptor
    async fn deliver(&self, action: &mut Action) -> ProcessResult {
        let adaptor = self.resolve_adaptor(action)?;

        let delivered = match adaptor.process(action).await {
            Ok(delivered) => delivered,
            Err(e) if e.is_transient() => {
                log::warn!(
                    "Noteling {}: transient delivery failure for {}: {}",
                    self.id,
                    action.subscription_id(),
                    e
                );
                return Ok(ProcessOutcome::Warning);
            }
            Err(e) => return Err(ProcessFailure(e.to_string())),
        };

        let subscription = action.subscription_mut();
        if delivered {
            subscription.clear_errors();
        } else {
            subscription.record_error();
        }

        if let Err(e) = self.store.update(subscription).await {
            log::warn!(
                "Noteling {}: failed to persist subscription {}: {}",
                self.id,
                subscription.id(),
                e
            );
            return Ok(ProcessOutcome::Warning);
        }

        if delivered {
            Ok(ProcessOutcome::Ok)
        } else {
            Ok(ProcessOutcome::Warning)
        }
    }
}

#[async_trait]
impl ActionProcessor for Noteling {
    async fn process(&self, action: &mut Action) -> ProcessResult {
        self.processed.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "Noteling {} processing {} action for {}",
            self.id,
            action.kind(),
            action.subscription_id()
        );
        match action.kind() {
            ActionKind::FetchItems => self.fetch(action).await,
            ActionKind::DeliverItem => self.deliver(action).await,
        }
    }
}
