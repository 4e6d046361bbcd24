//! Routing failures and their mapping onto wire errors.

use serde_json::{Value, json};
use thiserror::Error;

use caproute_protocol::{Envelope, ErrorCode, ProtocolError};

/// Result type for routing operations
pub type RouteResult<T> = Result<T, RouteError>;

/// A routing failure, carrying everything needed to build the wire reply.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct RouteError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
}

impl RouteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadMessage, message)
    }

    pub fn unsupported_protocol(version: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedProtocol,
            format!("no available node speaks protocol version {version}"),
        )
        .with_details(json!({ "protocol_version": version }))
    }

    pub fn adapter_not_found(from: &str) -> Self {
        Self::new(
            ErrorCode::AdapterNotFound,
            format!("no adapter chain from protocol version {from} to a supported version"),
        )
        .with_details(json!({ "from": from }))
    }

    pub fn no_route(intent: &str) -> Self {
        Self::new(
            ErrorCode::NoRoute,
            format!("no node supports capability: {intent}"),
        )
        .with_details(json!({ "capability": intent }))
    }

    pub fn required_extension_missing(missing: &[String]) -> Self {
        Self::new(
            ErrorCode::RequiredExtensionMissing,
            "every capable node requires an extension the message lacks",
        )
        .with_details(json!({ "missing": missing }))
    }

    pub fn permission_denied(intent: &str) -> Self {
        Self::new(
            ErrorCode::PermissionDenied,
            format!("permission policy denied routing of intent: {intent}"),
        )
        .with_details(json!({ "capability": intent }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Whether the caller may retry the same message unchanged.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Build the `intent: "error"` reply for this failure.
    pub fn into_envelope(self, parent_message_id: Option<&str>) -> Envelope {
        Envelope::error(self.code, self.message, parent_message_id, self.details)
    }
}

impl From<ProtocolError> for RouteError {
    fn from(err: ProtocolError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_into_envelope() {
        let envelope = RouteError::no_route("summarize").into_envelope(Some("m-1"));
        let wire = envelope.wire_error().unwrap();
        assert_eq!(wire.code, ErrorCode::NoRoute);
        assert!(!wire.retryable);
        assert_eq!(wire.details["capability"], "summarize");
        assert_eq!(envelope.trace().unwrap().parent_message_id, "m-1");
    }

    #[test]
    fn test_protocol_error_maps_to_bad_message() {
        let err: RouteError = ProtocolError::MissingField("intent").into();
        assert_eq!(err.code, ErrorCode::BadMessage);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_follows_code() {
        assert!(RouteError::new(ErrorCode::NodeTimeout, "t").is_retryable());
        assert!(!RouteError::no_route("x").is_retryable());
    }
}
