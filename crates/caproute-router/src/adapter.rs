//! Protocol version adapters and chain resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use caproute_protocol::Envelope;

use crate::error::{RouteError, RouteResult};

/// Transform applied to an envelope's payload and extensions when hopping
/// between protocol versions. The chain sets `protocol_version` itself.
pub type AdapterFn = dyn Fn(Envelope) -> Envelope + Send + Sync;

/// A single version-to-version adapter.
#[derive(Clone)]
pub struct Adapter {
    pub from: String,
    pub to: String,
    transform: Arc<AdapterFn>,
}

impl Adapter {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        transform: impl Fn(Envelope) -> Envelope + Send + Sync + 'static,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: Arc::new(transform),
        }
    }

    /// An adapter that only rewrites the version field.
    pub fn passthrough(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, |envelope| envelope)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Registry of version adapters with shortest-chain resolution.
#[derive(Debug, Default, Clone)]
pub struct AdapterChain {
    adapters: HashMap<String, Vec<Adapter>>,
}

impl AdapterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Adapter) {
        self.adapters
            .entry(adapter.from.clone())
            .or_default()
            .push(adapter);
    }

    pub fn with(mut self, adapter: Adapter) -> Self {
        self.register(adapter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Shortest composable chain from `from` into any version in
    /// `supported`, breadth-first. `None` when no chain exists. A version
    /// already in `supported` resolves to the empty chain.
    pub fn resolve(&self, from: &str, supported: &HashSet<String>) -> Option<Vec<Adapter>> {
        if supported.contains(from) {
            return Some(Vec::new());
        }

        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<(&str, Vec<Adapter>)> = VecDeque::from([(from, Vec::new())]);

        while let Some((version, chain)) = queue.pop_front() {
            for adapter in self.adapters.get(version).into_iter().flatten() {
                if !visited.insert(&adapter.to) {
                    continue;
                }
                let mut next = chain.clone();
                next.push(adapter.clone());
                if supported.contains(&adapter.to) {
                    return Some(next);
                }
                queue.push_back((&adapter.to, next));
            }
        }
        None
    }

    /// Resolve and apply a chain, producing the adapted envelope.
    ///
    /// Required fields other than `protocol_version` are preserved; each hop
    /// may rewrite the payload and extensions.
    pub fn adapt(
        &self,
        envelope: Envelope,
        supported: &HashSet<String>,
    ) -> RouteResult<(Envelope, usize)> {
        let from = envelope.protocol_version.clone();
        let chain = self
            .resolve(&from, supported)
            .ok_or_else(|| RouteError::adapter_not_found(&from))?;
        let hops = chain.len();
        if hops > 0 {
            debug!(from = %from, hops, "adapting message across protocol versions");
        }

        let message_id = envelope.message_id.clone();
        let intent = envelope.intent.clone();
        let mut adapted = envelope;
        for adapter in &chain {
            adapted = (adapter.transform)(adapted);
            adapted.protocol_version = adapter.to.clone();
            adapted.message_id = message_id.clone();
            adapted.intent = intent.clone();
        }
        Ok((adapted, hops))
    }
}
