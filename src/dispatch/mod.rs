//! Action Dispatch Core
//!
//! The concurrency machinery of the engine: a bounded action queue with
//! one dedicated consumer loop, per-subscription exclusive reservations
//! with a FIFO deferred-work index, and a delay-based retry scheduler with
//! a hard ceiling. No global lock serializes the system; the only
//! cross-cutting serialization point is the per-subscription reservation.

pub mod consumer;
pub mod deferred;
pub mod error;
pub mod queue;
pub mod reservation;
pub mod retry;

pub use consumer::{
    ActionProcessor, DispatchCounters, DispatchLoop, LoopHealth, LoopHealthCell, ProcessFailure,
    ProcessResult,
};
pub use deferred::DeferredActions;
pub use error::{DispatchError, DispatchResult};
pub use queue::ActionQueue;
pub use reservation::ReservationTable;
pub use retry::{RetryScheduler, Schedule};
