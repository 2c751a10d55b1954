//! Pool Error Types

use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur during pool operations.
///
/// Acquisition timeouts are not errors; they come back as the explicit
/// [`Acquire::Timeout`](crate::pool::Acquire) value so callers pattern-match
/// instead of catching.
#[derive(Debug, Error, Clone)]
pub enum PoolError {
    /// The type key is already configured
    #[error("Pool type '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Acquire against a type key that was never configured
    #[error("Pool type '{0}' is not registered")]
    UnknownType(String),

    /// A type must allow at least one instance
    #[error("Pool type '{0}' configured with zero instances")]
    InvalidCapacity(String),
}
