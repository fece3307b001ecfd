//! Failure values surfaced by the queue operations.
//!
//! Bounded queues refuse a push when full; every queue reports an empty
//! pop. Both are ordinary outcomes, not retried internally.

use thiserror::Error;

/// The queue is at capacity; the item was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is full")]
pub struct Full;

/// The queue held no item at the time of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is empty")]
pub struct Empty;
