//! Delivery-layer error types.

use thiserror::Error;

use caproute_router::RouteError;

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Failures of the durable queue backend.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue backend failure: {0}")]
    Backend(String),

    /// Lease was already acked, nacked, or expired and redelivered
    #[error("unknown lease: {0}")]
    UnknownLease(String),
}

/// Failures of the status/idempotency store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Completed and dead-lettered jobs never change state again
    #[error("job {0} is in a terminal state")]
    TerminalState(String),
}

/// Top-level delivery failures.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The submission was rejected before acceptance (validation, missing
    /// identity). Carries the routing error so the caller can build the
    /// wire reply.
    #[error(transparent)]
    Rejected(#[from] RouteError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
