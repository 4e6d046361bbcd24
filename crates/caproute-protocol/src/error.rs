//! Error codes and the wire error shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Stable error codes carried in `intent: "error"` envelopes.
///
/// The wire strings are part of the protocol contract and never change.
/// Only [`ErrorCode::NodeUnavailable`] and [`ErrorCode::NodeTimeout`] are
/// retryable; every other code requires caller correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Envelope failed structural validation
    #[serde(rename = "E_BAD_MESSAGE")]
    BadMessage,
    /// No node (and no adapter target) speaks the message's protocol version
    #[serde(rename = "E_UNSUPPORTED_PROTOCOL")]
    UnsupportedProtocol,
    /// No node advertises a capability matching the intent
    #[serde(rename = "E_NO_ROUTE")]
    NoRoute,
    /// Every capable node requires an extension the message lacks
    #[serde(rename = "E_REQUIRED_EXTENSION_MISSING")]
    RequiredExtensionMissing,
    /// The permission policy denied the routing decision
    #[serde(rename = "E_PERMISSION_DENIED")]
    PermissionDenied,
    /// The selected node could not be reached
    #[serde(rename = "E_NODE_UNAVAILABLE")]
    NodeUnavailable,
    /// The selected node did not answer within the dispatch timeout
    #[serde(rename = "E_NODE_TIMEOUT")]
    NodeTimeout,
    /// The selected node answered with a malformed message
    #[serde(rename = "E_NODE_ERROR")]
    NodeError,
    /// No composable adapter chain reaches a supported protocol version
    #[serde(rename = "E_ADAPTER_NOT_FOUND")]
    AdapterNotFound,
    /// Unexpected internal failure
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadMessage => "E_BAD_MESSAGE",
            ErrorCode::UnsupportedProtocol => "E_UNSUPPORTED_PROTOCOL",
            ErrorCode::NoRoute => "E_NO_ROUTE",
            ErrorCode::RequiredExtensionMissing => "E_REQUIRED_EXTENSION_MISSING",
            ErrorCode::PermissionDenied => "E_PERMISSION_DENIED",
            ErrorCode::NodeUnavailable => "E_NODE_UNAVAILABLE",
            ErrorCode::NodeTimeout => "E_NODE_TIMEOUT",
            ErrorCode::NodeError => "E_NODE_ERROR",
            ErrorCode::AdapterNotFound => "E_ADAPTER_NOT_FOUND",
            ErrorCode::Internal => "E_INTERNAL",
        }
    }

    /// Whether the caller may retry the same message unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::NodeUnavailable | ErrorCode::NodeTimeout)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object embedded in the payload of an `intent: "error"` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Structural validation failures for incoming envelopes.
///
/// All variants map to [`ErrorCode::BadMessage`] on the wire and are never
/// retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The raw input was not a JSON object
    #[error("message must be an object")]
    NotAnObject,

    /// A required envelope field is absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// An envelope field has the wrong JSON type
    #[error("{field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl ProtocolError {
    /// Wire error code for this validation failure.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::BadMessage
    }
}
