//! The routing pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};
use tracing::{debug, warn};

use caproute_protocol::{Envelope, ErrorCode};
use caproute_registry::{NodeDescriptor, NodeRegistry};

use crate::adapter::AdapterChain;
use crate::dispatch::Dispatcher;
use crate::error::{RouteError, RouteResult};
use crate::policy::PermissionPolicy;
use crate::select::select_best;

/// Intent of the planner fallback request.
pub const PLAN_ROUTE_INTENT: &str = "plan_route";

/// Router tuning knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Upper bound on a single dispatch, enforced by the router.
    pub dispatch_timeout: Duration,
    /// Hard cap on planner fallback recursion.
    pub max_planner_hops: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(3),
            max_planner_hops: 1,
        }
    }
}

/// Per-decision state threaded through pipeline re-entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteContext {
    planner_hops: u32,
}

/// The deterministic capability router.
///
/// One call produces exactly one of: a reply envelope from exactly one
/// dispatched node, or a single error envelope. The decision depends only on
/// the message and the registry contents, never on registration order.
pub struct Router {
    registry: Arc<NodeRegistry>,
    adapters: AdapterChain,
    dispatcher: Arc<dyn Dispatcher>,
    policy: Option<Arc<dyn PermissionPolicy>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(registry: Arc<NodeRegistry>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            registry,
            adapters: AdapterChain::new(),
            dispatcher,
            policy: None,
            config: RouterConfig::default(),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterChain) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PermissionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Route a raw JSON message. Total: every input yields exactly one
    /// envelope, either a node's reply or a single error reply.
    pub async fn route(&self, raw: &Value) -> Envelope {
        let envelope = match Envelope::validate(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "rejecting invalid message");
                return RouteError::from(err).into_envelope(None);
            }
        };
        let parent = envelope.message_id.clone();
        match self.route_envelope(envelope).await {
            Ok(reply) => reply,
            Err(err) => err.into_envelope(Some(&parent)),
        }
    }

    /// Route an already-validated envelope.
    pub async fn route_envelope(&self, envelope: Envelope) -> RouteResult<Envelope> {
        self.route_inner(envelope, RouteContext::default()).await
    }

    fn route_inner(
        &self,
        envelope: Envelope,
        ctx: RouteContext,
    ) -> BoxFuture<'_, RouteResult<Envelope>> {
        Box::pin(async move {
            let supported = self.registry.protocols();
            let envelope = self.ensure_protocol(envelope, &supported)?;

            let candidates = self.capable_candidates(&envelope);
            if candidates.is_empty() {
                return self.planner_fallback(envelope, ctx).await;
            }

            let candidates = filter_requirements(&envelope, candidates)?;
            let candidates = self.filter_policy(&envelope, candidates)?;

            // Non-empty by construction; still, never panic on a decision.
            let node = select_best(&candidates)
                .cloned()
                .ok_or_else(|| RouteError::internal("selection over empty candidate set"))?;
            debug!(
                intent = %envelope.intent,
                node_id = %node.node_id,
                "routing decision"
            );

            self.dispatch(node, envelope).await
        })
    }

    /// Protocol filter plus adapter chain. Adaptation happens at most once
    /// per decision; `adapt` applies a whole chain in one step.
    fn ensure_protocol(
        &self,
        envelope: Envelope,
        supported: &HashSet<String>,
    ) -> RouteResult<Envelope> {
        if supported.contains(&envelope.protocol_version) {
            return Ok(envelope);
        }
        if supported.is_empty() {
            return Err(RouteError::unsupported_protocol(&envelope.protocol_version));
        }
        let (adapted, _) = self.adapters.adapt(envelope, supported)?;
        Ok(adapted)
    }

    /// Available nodes that both speak the message's protocol version and
    /// advertise a capability matching its intent.
    fn capable_candidates(&self, envelope: &Envelope) -> Vec<NodeDescriptor> {
        self.registry
            .find_by_capability(&envelope.intent)
            .into_iter()
            .filter(|node| node.supports_protocol(&envelope.protocol_version))
            .collect()
    }

    fn filter_policy(
        &self,
        envelope: &Envelope,
        candidates: Vec<NodeDescriptor>,
    ) -> RouteResult<Vec<NodeDescriptor>> {
        let Some(policy) = &self.policy else {
            return Ok(candidates);
        };
        let allowed: Vec<_> = candidates
            .into_iter()
            .filter(|node| policy.allow(envelope, node))
            .collect();
        if allowed.is_empty() {
            warn!(intent = %envelope.intent, "permission policy rejected all candidates");
            return Err(RouteError::permission_denied(&envelope.intent));
        }
        Ok(allowed)
    }

    /// Ask a planner node to rewrite an unroutable message, then re-run the
    /// pipeline on its output. At most one planner hop per decision; any
    /// planner failure degrades to the plain no-route error.
    async fn planner_fallback(
        &self,
        envelope: Envelope,
        ctx: RouteContext,
    ) -> RouteResult<Envelope> {
        let no_route = RouteError::no_route(&envelope.intent);
        if ctx.planner_hops >= self.config.max_planner_hops
            || envelope.intent == PLAN_ROUTE_INTENT
        {
            return Err(no_route);
        }
        if self.registry.find_by_capability(PLAN_ROUTE_INTENT).is_empty() {
            return Err(no_route);
        }

        debug!(intent = %envelope.intent, "invoking planner fallback");
        let mut request = Envelope::new(
            envelope.protocol_version.clone(),
            PLAN_ROUTE_INTENT,
            json!({
                "missing_capability": envelope.intent,
                "original_message": envelope.to_value(),
            }),
        );
        if let Some(identity) = envelope.identity() {
            request = request.with_identity(&identity);
        }

        let next_ctx = RouteContext {
            planner_hops: ctx.planner_hops + 1,
        };
        let plan = match self.route_inner(request, next_ctx).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "planner fallback failed");
                return Err(no_route);
            }
        };
        if plan.is_error() || plan.message_id == envelope.message_id {
            return Err(no_route);
        }

        self.route_inner(plan, next_ctx).await
    }

    /// Record the trace hop, then dispatch under the configured timeout.
    async fn dispatch(&self, node: NodeDescriptor, mut envelope: Envelope) -> RouteResult<Envelope> {
        envelope.record_hop(node.node_id.as_str());

        let sent = tokio::time::timeout(
            self.config.dispatch_timeout,
            self.dispatcher.send(&node, envelope),
        )
        .await;

        match sent {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                warn!(node_id = %node.node_id, error = %err, "dispatch failed");
                Err(RouteError::new(err.code(), err.to_string())
                    .with_details(json!({ "node_id": node.node_id.as_str() })))
            }
            Err(_) => {
                warn!(node_id = %node.node_id, "dispatch timed out");
                Err(RouteError::new(
                    ErrorCode::NodeTimeout,
                    format!(
                        "node {} did not reply within {:?}",
                        node.node_id, self.config.dispatch_timeout
                    ),
                )
                .with_details(json!({ "node_id": node.node_id.as_str() })))
            }
        }
    }
}

/// Required-extensions filter.
///
/// Keeps candidates whose every `requires` entry is satisfied. When the
/// intent is routable but no candidate's requirements are met, the error
/// lists the union of missing extensions so the caller can correct the
/// message.
fn filter_requirements(
    envelope: &Envelope,
    candidates: Vec<NodeDescriptor>,
) -> RouteResult<Vec<NodeDescriptor>> {
    let mut missing: Vec<String> = Vec::new();
    let satisfied: Vec<_> = candidates
        .into_iter()
        .filter(|node| {
            let unmet: Vec<_> = node
                .requires
                .iter()
                .filter(|ext| !envelope.has_extension(ext))
                .cloned()
                .collect();
            for ext in &unmet {
                if !missing.contains(ext) {
                    missing.push(ext.clone());
                }
            }
            unmet.is_empty()
        })
        .collect();
    if satisfied.is_empty() {
        missing.sort();
        return Err(RouteError::required_extension_missing(&missing));
    }
    Ok(satisfied)
}
