//! # Caproute Registry
//!
//! Node descriptors and the live node registry.
//!
//! Nodes announce themselves with a [`NodeDescriptor`] (capabilities,
//! supported protocol versions, required extensions, priority) and keep
//! themselves selectable by heartbeating. The [`NodeRegistry`] is the single
//! source of truth the router queries; lookups only ever return nodes whose
//! heartbeat is fresh.

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{NodeDescriptor, NodeId};
pub use error::{NodeIdError, RegistryError, RegistryResult};
pub use registry::{NodeEntry, NodeRegistry, RegistryConfig};
