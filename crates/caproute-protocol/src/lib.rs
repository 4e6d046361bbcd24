//! # Caproute Protocol
//!
//! Wire-level types for the caproute capability routing protocol: the message
//! envelope, the stable error-code vocabulary, and the structural validator
//! that guards every entry point.
//!
//! Every message on the wire is an [`Envelope`] with four required fields
//! (`protocol_version`, `message_id`, `intent`, `payload`) and an optional
//! `extensions` object. Failures travel as envelopes too, with
//! `intent: "error"` and a [`WireError`] payload.
//!
//! ## Example
//!
//! ```rust
//! use caproute_protocol::{Envelope, PROTOCOL_VERSION};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "protocol_version": PROTOCOL_VERSION,
//!     "message_id": "m-1",
//!     "intent": "echo",
//!     "payload": { "text": "hi" },
//! });
//!
//! let message = Envelope::validate(&raw).unwrap();
//! assert_eq!(message.intent, "echo");
//! ```

pub mod envelope;
pub mod error;
pub mod extensions;

pub use envelope::{Envelope, JsonMap};
pub use error::{ErrorCode, ProtocolError, ProtocolResult, WireError};
pub use extensions::{EXT_IDENTITY, EXT_TRACE, Identity, Trace};

/// Default protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "0.1";
