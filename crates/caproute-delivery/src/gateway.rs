//! Asynchronous accept gateway.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};

use caproute_protocol::{Envelope, EXT_IDENTITY};
use caproute_router::RouteError;

use crate::audit::{AuditEvent, AuditKind, AuditLog};
use crate::error::{DeliveryError, DeliveryResult};
use crate::job::JobStatus;
use crate::queue::{Delivery, DurableQueue};
use crate::status::{CreateOutcome, StatusStore};

/// Gateway tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Reject submissions without an `identity` extension.
    pub require_identity: bool,
}

/// Tracking handles returned on acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub tracking_id: String,
    pub status_url: String,
    pub replay_url: String,
}

impl Accepted {
    fn for_message(message_id: &str) -> Self {
        Self {
            tracking_id: message_id.to_string(),
            status_url: format!("/status/{message_id}"),
            replay_url: format!("/replay/{message_id}"),
        }
    }
}

/// Entry point of the async delivery path.
///
/// Acceptance means the message passed validation and was durably enqueued;
/// it says nothing about routability. Routing failures after acceptance
/// surface only through [`AcceptGateway::status`] and
/// [`AcceptGateway::replay`]. There is no cancellation once accepted.
pub struct AcceptGateway {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn StatusStore>,
    audit: Arc<dyn AuditLog>,
    config: GatewayConfig,
}

impl AcceptGateway {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn StatusStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            queue,
            store,
            audit,
            config: GatewayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and durably accept a raw message.
    ///
    /// Re-submitting a known message_id returns the same handles without a
    /// second enqueue, so client retries of the accept call are harmless.
    pub async fn accept(&self, raw: &Value) -> DeliveryResult<Accepted> {
        let envelope = Envelope::validate(raw).map_err(RouteError::from)?;
        if self.config.require_identity && envelope.identity().is_none() {
            warn!(message_id = %envelope.message_id, "rejecting submission without identity");
            return Err(RouteError::required_extension_missing(&[EXT_IDENTITY.to_string()]).into());
        }

        let message_id = envelope.message_id.clone();
        match self.store.create_if_absent(&message_id).await? {
            CreateOutcome::Existing(record) => {
                info!(message_id = %message_id, state = %record.state, "duplicate accept, returning handles");
                return Ok(Accepted::for_message(&message_id));
            }
            CreateOutcome::Created(_) => {}
        }

        self.audit
            .append(
                &message_id,
                AuditKind::Enqueued,
                json!({ "intent": envelope.intent }),
            )
            .await?;

        if let Err(err) = self.queue.enqueue(Delivery::new(envelope)).await {
            // The record exists but nothing will ever consume it.
            warn!(message_id = %message_id, error = %err, "enqueue failed after accept");
            self.store.mark_error(&message_id, "E_INTERNAL").await?;
            return Err(err.into());
        }

        info!(message_id = %message_id, "accepted for asynchronous delivery");
        Ok(Accepted::for_message(&message_id))
    }

    /// Current status of an accepted message.
    pub async fn status(&self, message_id: &str) -> DeliveryResult<Option<JobStatus>> {
        Ok(self
            .store
            .get(message_id)
            .await?
            .map(|record| record.status()))
    }

    /// Full audit timeline of an accepted message.
    pub async fn replay(&self, message_id: &str) -> DeliveryResult<Vec<AuditEvent>> {
        Ok(self.audit.events(message_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::job::JobState;
    use crate::queue::InMemoryQueue;
    use crate::status::InMemoryStatusStore;
    use caproute_protocol::{ErrorCode, PROTOCOL_VERSION};

    fn gateway() -> (AcceptGateway, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::default());
        let gateway = AcceptGateway::new(
            Arc::clone(&queue) as Arc<dyn DurableQueue>,
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryAuditLog::new()),
        );
        (gateway, queue)
    }

    fn raw(message_id: &str) -> Value {
        json!({
            "protocol_version": PROTOCOL_VERSION,
            "message_id": message_id,
            "intent": "echo",
            "payload": {},
        })
    }

    #[tokio::test]
    async fn test_accept_enqueues_and_tracks() {
        let (gateway, queue) = gateway();
        let accepted = gateway.accept(&raw("m-1")).await.unwrap();
        assert_eq!(accepted.tracking_id, "m-1");
        assert_eq!(accepted.status_url, "/status/m-1");
        assert_eq!(accepted.replay_url, "/replay/m-1");
        assert_eq!(queue.depth().await.unwrap(), 1);

        let status = gateway.status("m-1").await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.attempts, 0);

        let events = gateway.replay("m-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::Enqueued);
    }

    #[tokio::test]
    async fn test_invalid_message_rejected() {
        let (gateway, queue) = gateway();
        let err = gateway.accept(&json!({ "intent": "echo" })).await.unwrap_err();
        let DeliveryError::Rejected(route_err) = err else {
            panic!("expected rejection");
        };
        assert_eq!(route_err.code, ErrorCode::BadMessage);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identity_requirement() {
        let queue = Arc::new(InMemoryQueue::default());
        let gateway = AcceptGateway::new(
            queue,
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryAuditLog::new()),
        )
        .with_config(GatewayConfig {
            require_identity: true,
        });

        let err = gateway.accept(&raw("m-1")).await.unwrap_err();
        let DeliveryError::Rejected(route_err) = err else {
            panic!("expected rejection");
        };
        assert_eq!(route_err.code, ErrorCode::RequiredExtensionMissing);

        let mut with_identity = raw("m-2");
        with_identity["extensions"] = json!({
            "identity": { "actor_id": "u1", "actor_type": "human" }
        });
        assert!(gateway.accept(&with_identity).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_accept_returns_same_handles_without_reenqueue() {
        let (gateway, queue) = gateway();
        let first = gateway.accept(&raw("m-1")).await.unwrap();
        let second = gateway.accept(&raw("m-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(queue.depth().await.unwrap(), 1);

        // Only one enqueued event.
        let events = gateway.replay("m-1").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_status_is_none() {
        let (gateway, _) = gateway();
        assert!(gateway.status("nope").await.unwrap().is_none());
        assert!(gateway.replay("nope").await.unwrap().is_empty());
    }
}
