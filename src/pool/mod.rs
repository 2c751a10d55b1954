//! Generic Bounded Resource Pool
//!
//! Bounds concurrent usage of expensive-to-construct resources (processing
//! workers, connector instances, adaptor instances) behind per-type-key
//! caps with timeout-bounded acquisition and load statistics.
//!
//! The pool grows on demand up to the cap rather than pre-warming: the
//! first `max_instances` acquisitions of a type construct fresh instances
//! without blocking, later callers wait for a returned one.

pub mod error;
pub mod resource_pool;
pub mod statistics;

pub use error::{PoolError, PoolResult};
pub use resource_pool::{Acquire, PoolEntry, ResourcePool};
pub use statistics::{PoolStatistics, TypePoolStats};
