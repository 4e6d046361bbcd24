//! The live node registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::descriptor::{NodeDescriptor, NodeId};
use crate::error::{RegistryError, RegistryResult};

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// A node whose last heartbeat is older than this is not selectable.
    pub heartbeat_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// A registered node plus its liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub descriptor: NodeDescriptor,
    /// Bumped on every (re)registration. Entries are replaced wholesale,
    /// never mutated in place, so a clone taken by a reader stays coherent.
    pub generation: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeEntry {
    fn is_available(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = now.signed_duration_since(self.last_heartbeat);
        age.to_std().map(|age| age <= timeout).unwrap_or(true)
    }
}

/// Concurrency-safe registry of live nodes.
///
/// Lookups (`find_by_protocol`, `find_by_capability`) only return nodes whose
/// heartbeat is within the configured timeout. Stale entries stay readable
/// through [`NodeRegistry::get`] and [`NodeRegistry::snapshot`] for
/// diagnosis.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeEntry>,
    generation: AtomicU64,
    config: RegistryConfig,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl NodeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            generation: AtomicU64::new(0),
            config,
        }
    }

    /// Register or re-register a node.
    ///
    /// Re-registration replaces the descriptor, refreshes the heartbeat, and
    /// bumps the generation counter.
    pub fn register(&self, descriptor: NodeDescriptor) -> RegistryResult<()> {
        if descriptor.capabilities.is_empty() {
            return Err(RegistryError::NoCapabilities(
                descriptor.node_id.to_string(),
            ));
        }
        if descriptor.supported_protocol_versions.is_empty() {
            return Err(RegistryError::NoProtocolVersions(
                descriptor.node_id.to_string(),
            ));
        }

        let now = Utc::now();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let node_id = descriptor.node_id.clone();
        let registered_at = self
            .nodes
            .get(&node_id)
            .map(|entry| entry.registered_at)
            .unwrap_or(now);

        info!(node_id = %node_id, generation, "node registered");
        self.nodes.insert(
            node_id,
            NodeEntry {
                descriptor,
                generation,
                registered_at,
                last_heartbeat: now,
            },
        );
        Ok(())
    }

    /// Remove a node. Unknown nodes are an error.
    pub fn deregister(&self, node_id: &NodeId) -> RegistryResult<()> {
        match self.nodes.remove(node_id) {
            Some(_) => {
                info!(node_id = %node_id, "node deregistered");
                Ok(())
            }
            None => Err(RegistryError::UnknownNode(node_id.to_string())),
        }
    }

    /// Refresh a node's liveness.
    pub fn heartbeat(&self, node_id: &NodeId) -> RegistryResult<()> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.to_string()))?;
        entry.last_heartbeat = Utc::now();
        debug!(node_id = %node_id, "heartbeat");
        Ok(())
    }

    /// Read a node's entry regardless of liveness.
    pub fn get(&self, node_id: &NodeId) -> Option<NodeEntry> {
        self.nodes.get(node_id).map(|entry| entry.clone())
    }

    /// Whether a node is registered and fresh.
    pub fn is_available(&self, node_id: &NodeId) -> bool {
        let now = Utc::now();
        self.nodes
            .get(node_id)
            .map(|entry| entry.is_available(now, self.config.heartbeat_timeout))
            .unwrap_or(false)
    }

    /// Descriptors of all available nodes.
    pub fn available(&self) -> Vec<NodeDescriptor> {
        self.collect(|_| true)
    }

    /// Available nodes that speak `version`.
    pub fn find_by_protocol(&self, version: &str) -> Vec<NodeDescriptor> {
        self.collect(|d| d.supports_protocol(version))
    }

    /// Available nodes advertising a capability matching `intent`.
    pub fn find_by_capability(&self, intent: &str) -> Vec<NodeDescriptor> {
        self.collect(|d| d.has_capability(intent))
    }

    /// All entries, live or stale.
    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.nodes.iter().map(|entry| entry.clone()).collect()
    }

    /// Protocol versions spoken by at least one available node.
    pub fn protocols(&self) -> std::collections::HashSet<String> {
        self.available()
            .into_iter()
            .flat_map(|d| d.supported_protocol_versions)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn collect(&self, keep: impl Fn(&NodeDescriptor) -> bool) -> Vec<NodeDescriptor> {
        let now = Utc::now();
        self.nodes
            .iter()
            .filter(|entry| entry.is_available(now, self.config.heartbeat_timeout))
            .filter(|entry| keep(&entry.descriptor))
            .map(|entry| entry.descriptor.clone())
            .collect()
    }
}
