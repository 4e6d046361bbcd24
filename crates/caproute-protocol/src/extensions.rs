//! Typed views over well-known envelope extensions.
//!
//! Extensions are open-ended structured metadata: nodes that do not
//! understand an extension must ignore it. This module only names the two
//! extensions the core itself reads and writes.

use serde::{Deserialize, Serialize};

/// Extension key for caller identity.
pub const EXT_IDENTITY: &str = "identity";

/// Extension key for provenance tracing.
pub const EXT_TRACE: &str = "trace";

/// Caller identity carried in `extensions.identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor_id: String,
    pub actor_type: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>, actor_type: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_type: actor_type.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether the identity carries a role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Provenance trace carried in `extensions.trace`.
///
/// The trace is append-only: every hop increments `depth` and pushes the
/// handling node onto `path`. `parent_message_id` links derived messages
/// (planner output, error replies) back to their origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub parent_message_id: String,
    pub depth: u32,
    #[serde(default)]
    pub path: Vec<String>,
}

impl Trace {
    pub fn root(parent_message_id: impl Into<String>) -> Self {
        Self {
            parent_message_id: parent_message_id.into(),
            depth: 0,
            path: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roles() {
        let identity = Identity::new("u1", "human").with_roles(["admin", "user"]);
        assert!(identity.has_role("admin"));
        assert!(!identity.has_role("operator"));
    }

    #[test]
    fn test_identity_deserializes_without_roles() {
        let identity: Identity =
            serde_json::from_value(serde_json::json!({"actor_id": "u1", "actor_type": "agent"}))
                .unwrap();
        assert!(identity.roles.is_empty());
    }

    #[test]
    fn test_trace_root() {
        let trace = Trace::root("m-1");
        assert_eq!(trace.parent_message_id, "m-1");
        assert_eq!(trace.depth, 0);
        assert!(trace.path.is_empty());
    }
}
