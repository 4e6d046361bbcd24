//! Registry error types.

use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Validation failures for node identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("node id must not be empty")]
    Empty,

    #[error("node id must not exceed {max} characters (got {len})")]
    TooLong { len: usize, max: usize },

    #[error("node id must not have surrounding whitespace")]
    SurroundingWhitespace,

    #[error("node id contains invalid character: {0:?}")]
    InvalidCharacter(char),
}

/// Failures of registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidNodeId(#[from] NodeIdError),

    /// Descriptor announces no capability
    #[error("node {0} must declare at least one capability")]
    NoCapabilities(String),

    /// Descriptor announces no protocol version
    #[error("node {0} must declare at least one supported protocol version")]
    NoProtocolVersions(String),

    /// Operation referenced a node that is not registered
    #[error("unknown node: {0}")]
    UnknownNode(String),
}
