//! The message envelope and its structural validator.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::PROTOCOL_VERSION;
use crate::error::{ErrorCode, ProtocolError, WireError};
use crate::extensions::{EXT_IDENTITY, EXT_TRACE, Identity, Trace};

/// JSON object map used for payloads and extensions.
pub type JsonMap = serde_json::Map<String, Value>;

/// Intent reserved for error replies.
pub const ERROR_INTENT: &str = "error";

/// A protocol message.
///
/// Required fields are forwarded unmodified by the router; only
/// `extensions` may gain entries (for example the provenance trace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol_version: String,
    pub message_id: String,
    pub intent: String,
    pub payload: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonMap>,
}

impl Envelope {
    /// Create a message with a fresh `message_id`.
    ///
    /// `payload` must serialize to a JSON object; anything else becomes an
    /// empty payload.
    pub fn new(
        protocol_version: impl Into<String>,
        intent: impl Into<String>,
        payload: Value,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };
        Self {
            protocol_version: protocol_version.into(),
            message_id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            payload,
            extensions: None,
        }
    }

    /// Build an `intent: "error"` reply.
    ///
    /// When a parent id is known, the reply carries a trace linking back to
    /// it. `details` must never contain secrets; ids, codes, and field lists
    /// only.
    pub fn error(
        code: ErrorCode,
        message: impl Into<String>,
        parent_message_id: Option<&str>,
        details: Value,
    ) -> Self {
        let wire = WireError {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            details,
        };
        let mut envelope = Self::new(PROTOCOL_VERSION, ERROR_INTENT, json!({ "error": wire }));
        if let Some(parent) = parent_message_id {
            envelope.set_extension(
                EXT_TRACE,
                json!({
                    "parent_message_id": parent,
                    "depth": 1,
                    "path": [],
                }),
            );
        }
        envelope
    }

    /// Structurally validate a raw JSON value into an [`Envelope`].
    ///
    /// Checks exactly: the input is an object, the four required fields are
    /// present with the right primitive types, and `extensions` (if present
    /// and non-null) is an object. No side effects; failures are never
    /// retryable.
    pub fn validate(raw: &Value) -> Result<Envelope, ProtocolError> {
        let obj = raw.as_object().ok_or(ProtocolError::NotAnObject)?;

        for field in ["protocol_version", "message_id", "intent", "payload"] {
            if !obj.contains_key(field) {
                return Err(ProtocolError::MissingField(field));
            }
        }

        let protocol_version = obj["protocol_version"]
            .as_str()
            .ok_or(ProtocolError::WrongType {
                field: "protocol_version",
                expected: "string",
            })?
            .to_string();
        let message_id = obj["message_id"]
            .as_str()
            .ok_or(ProtocolError::WrongType {
                field: "message_id",
                expected: "string",
            })?
            .to_string();
        let intent = obj["intent"]
            .as_str()
            .ok_or(ProtocolError::WrongType {
                field: "intent",
                expected: "string",
            })?
            .to_string();
        let payload = obj["payload"]
            .as_object()
            .ok_or(ProtocolError::WrongType {
                field: "payload",
                expected: "object",
            })?
            .clone();

        let extensions = match obj.get("extensions") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => {
                return Err(ProtocolError::WrongType {
                    field: "extensions",
                    expected: "object",
                });
            }
        };

        Ok(Envelope {
            protocol_version,
            message_id,
            intent,
            payload,
            extensions,
        })
    }

    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        self.intent == ERROR_INTENT
    }

    /// Parse the wire error out of an error reply.
    pub fn wire_error(&self) -> Option<WireError> {
        let raw = self.payload.get("error")?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Whether `name` is present as an object in `extensions`.
    ///
    /// This is the satisfaction test for node `requires` entries: the
    /// extension must exist and be a structured object, not merely any value.
    pub fn has_extension(&self, name: &str) -> bool {
        matches!(
            self.extensions.as_ref().and_then(|ext| ext.get(name)),
            Some(Value::Object(_))
        )
    }

    /// Set (or replace) an extension entry.
    pub fn set_extension(&mut self, name: impl Into<String>, value: Value) {
        self.extensions
            .get_or_insert_with(JsonMap::new)
            .insert(name.into(), value);
    }

    /// Builder form of [`Envelope::set_extension`].
    pub fn with_extension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_extension(name, value);
        self
    }

    /// Attach a caller identity extension.
    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.set_extension(EXT_IDENTITY, json!(identity));
        self
    }

    /// Typed view of `extensions.identity`, when present and well-formed.
    pub fn identity(&self) -> Option<Identity> {
        let raw = self.extensions.as_ref()?.get(EXT_IDENTITY)?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Typed view of `extensions.trace`, when present and well-formed.
    pub fn trace(&self) -> Option<Trace> {
        let raw = self.extensions.as_ref()?.get(EXT_TRACE)?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Record a routing hop in `extensions.trace`.
    ///
    /// Seeds the trace with this message as its own parent when absent, then
    /// increments the depth and appends `hop` to the path. Required fields
    /// are never touched.
    pub fn record_hop(&mut self, hop: &str) {
        let mut trace = self
            .trace()
            .unwrap_or_else(|| Trace::root(self.message_id.clone()));
        trace.depth += 1;
        trace.path.push(hop.to_string());
        self.set_extension(EXT_TRACE, json!(trace));
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        json!(self)
    }
}
