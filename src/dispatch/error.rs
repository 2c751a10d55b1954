//! Dispatch Error Types

use thiserror::Error;

use crate::pool::PoolError;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur on the dispatch paths
#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    /// Shutdown was requested; enqueue callers stop retrying
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// The queue's consumer has gone away
    #[error("Action queue '{0}' is closed")]
    QueueClosed(String),

    /// Pool misconfiguration surfaced on the dispatch path
    #[error(transparent)]
    Pool(#[from] PoolError),
}
