//! Node identifiers and the self-describing node descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NodeIdError;

const MAX_NODE_ID_LEN: usize = 128;

/// Validated node identifier.
///
/// Rules: non-empty, at most 128 characters, no surrounding whitespace, only
/// alphanumerics plus `-`, `_`, and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse and validate a node id from a string.
    pub fn parse(id: impl AsRef<str>) -> Result<Self, NodeIdError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if id.len() > MAX_NODE_ID_LEN {
            return Err(NodeIdError::TooLong {
                len: id.len(),
                max: MAX_NODE_ID_LEN,
            });
        }
        if id.trim() != id {
            return Err(NodeIdError::SurroundingWhitespace);
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(NodeIdError::InvalidCharacter(bad));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// A node's self-description, announced at registration.
///
/// `capabilities` map message intents to this node; `requires` names the
/// extensions a message must carry before this node will accept it.
/// `priority` breaks ties between equally capable nodes (higher wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub node_version: String,
    pub supported_protocol_versions: Vec<String>,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub optional_features_supported: Vec<String>,
    #[serde(default)]
    pub priority: i64,
}

impl NodeDescriptor {
    pub fn new(node_id: NodeId, node_version: impl Into<String>) -> Self {
        Self {
            node_id,
            node_version: node_version.into(),
            supported_protocol_versions: Vec::new(),
            capabilities: Vec::new(),
            requires: Vec::new(),
            optional_features_supported: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_protocols(mut self, versions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.supported_protocol_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requires(mut self, requires: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn supports_protocol(&self, version: &str) -> bool {
        self.supported_protocol_versions.iter().any(|v| v == version)
    }

    pub fn has_capability(&self, intent: &str) -> bool {
        self.capabilities.iter().any(|c| c == intent)
    }
}
