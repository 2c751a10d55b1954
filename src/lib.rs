//! Noteling: a notification dispatch engine for calendar events.
//!
//! The engine moves units of work ([`Action`]s) from intake to a pooled
//! worker under three guarantees: bounded queues with dedicated consumer
//! loops, at most one in-flight action per subscription (extra work is
//! deferred FIFO), and delay-based retries bounded by a hard ceiling.
//!
//! Embedding applications register [`Connector`] and [`Adaptor`]
//! implementations in a [`Registry`], provide a [`SubscriptionStore`],
//! then build and start an [`Engine`]. All intake goes through
//! [`Engine::handle_action`].

pub mod action;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod stats;
pub mod subscription;

pub use action::{Action, ActionKind, ProcessOutcome};
pub use config::EngineConfig;
pub use dispatch::{DispatchError, DispatchResult, LoopHealth};
pub use engine::{Engine, EngineError, EngineHealth, EngineResult, Noteling};
pub use registry::{
    AcceptAllAuthenticator, Adaptor, AdaptorError, AdaptorResult, Authenticator, Connector,
    ConnectorError, ConnectorResult, NoteItem, Registry, RegistryError,
};
pub use stats::StatPair;
pub use subscription::{
    MemoryStore, StoreError, StoreResult, Subscription, SubscriptionId, SubscriptionStore,
};
