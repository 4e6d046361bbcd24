//! The dispatch seam between the router and node transports.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use caproute_protocol::{Envelope, ErrorCode};
use caproute_registry::NodeDescriptor;

/// Transport-level dispatch failures.
///
/// These are the only failures a transport may surface; everything else must
/// come back as a well-formed reply envelope (including `intent: "error"`
/// replies produced by the node itself).
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The node could not be reached at all
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The node did not reply within the dispatch timeout
    #[error("node did not reply within {0:?}")]
    Timeout(Duration),

    /// The node replied with something that is not a valid envelope
    #[error("node returned a malformed reply: {0}")]
    Malformed(String),
}

impl DispatchError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Unavailable(_) => ErrorCode::NodeUnavailable,
            DispatchError::Timeout(_) => ErrorCode::NodeTimeout,
            DispatchError::Malformed(_) => ErrorCode::NodeError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Delivers a message to a selected node and returns its reply.
///
/// Implementations exist per transport; the in-process
/// [`HandlerDispatcher`](crate::handler::HandlerDispatcher) is the built-in
/// one. The router enforces its own timeout around `send`, so
/// implementations need not race the clock themselves.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(
        &self,
        node: &NodeDescriptor,
        message: Envelope,
    ) -> Result<Envelope, DispatchError>;
}
