//! The queue consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use caproute_protocol::Envelope;
use caproute_router::{RouteError, Router};

use crate::audit::{AuditKind, AuditLog};
use crate::error::DeliveryResult;
use crate::queue::{DurableQueue, LeasedDelivery};
use crate::status::{ClaimOutcome, StatusStore};

/// Executes one routing decision for the worker.
///
/// Retryable failures (`E_NODE_UNAVAILABLE`, `E_NODE_TIMEOUT`) trigger the
/// retry schedule; everything else parks the job for caller correction.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, message: &Envelope) -> Result<Envelope, RouteError>;
}

#[async_trait]
impl JobExecutor for Router {
    async fn execute(&self, message: &Envelope) -> Result<Envelope, RouteError> {
        self.route_envelope(message.clone()).await
    }
}

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Attempts before dead-lettering, including the first.
    pub max_attempts: u32,
    /// How long an execution claim holds before a crashed worker's claim
    /// expires.
    pub claim_ttl: Duration,
    /// Delay before a retryable failure is redelivered.
    pub retry_backoff: Duration,
    /// Idle poll interval of the run loop.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            claim_ttl: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Consumes the durable queue and drives jobs to a terminal state.
///
/// Workers share the queue, status store, and audit log; the store's atomic
/// claim keeps concurrent workers (and redelivered messages) from executing
/// the same job twice.
pub struct Worker {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn StatusStore>,
    audit: Arc<dyn AuditLog>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn StatusStore>,
        audit: Arc<dyn AuditLog>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            queue,
            store,
            audit,
            executor,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Consume until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "worker step failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!("worker stopped");
    }

    /// Process at most one delivery. Returns whether one was dequeued.
    pub async fn run_once(&self) -> DeliveryResult<bool> {
        let Some(leased) = self.queue.dequeue().await? else {
            return Ok(false);
        };
        let message_id = leased.delivery.message.message_id.clone();

        match self.store.claim(&message_id, self.config.claim_ttl).await? {
            ClaimOutcome::Terminal(record) => {
                // Redelivery of a finished job: surface the stored outcome,
                // never execute again.
                debug!(message_id = %message_id, state = %record.state, "duplicate delivery");
                self.audit
                    .append(
                        &message_id,
                        AuditKind::DuplicateDelivery,
                        json!({ "state": record.state }),
                    )
                    .await?;
                self.queue.ack(&leased.lease_id).await?;
            }
            ClaimOutcome::Busy => {
                debug!(message_id = %message_id, "claim busy, deferring");
                self.queue
                    .nack(&leased.lease_id, self.config.poll_interval)
                    .await?;
            }
            ClaimOutcome::Claimed(record) => {
                self.audit
                    .append(
                        &message_id,
                        AuditKind::WorkerReceive,
                        json!({ "attempt": record.attempt_count + 1 }),
                    )
                    .await?;
                self.execute_claimed(leased).await?;
            }
        }
        Ok(true)
    }

    async fn execute_claimed(&self, leased: LeasedDelivery) -> DeliveryResult<()> {
        let message_id = leased.delivery.message.message_id.clone();

        // A node-produced error envelope counts as a failure too; its
        // retryable flag decides the path, same as a pipeline error.
        let outcome = match self.executor.execute(&leased.delivery.message).await {
            Ok(reply) => match reply.wire_error() {
                Some(wire) => Err((wire.code.as_str().to_string(), wire.retryable)),
                None => Ok(reply),
            },
            Err(err) => {
                let retryable = err.is_retryable();
                Err((err.code.as_str().to_string(), retryable))
            }
        };

        match outcome {
            Ok(reply) => {
                self.store.complete(&message_id, reply).await?;
                self.audit
                    .append(&message_id, AuditKind::WorkerComplete, json!({}))
                    .await?;
                self.queue.ack(&leased.lease_id).await?;
                info!(message_id = %message_id, "job completed");
            }
            Err((code, true)) => self.handle_retryable(&message_id, &code, leased).await?,
            Err((code, false)) => {
                self.store.mark_error(&message_id, &code).await?;
                self.audit
                    .append(
                        &message_id,
                        AuditKind::WorkerError,
                        json!({ "code": code }),
                    )
                    .await?;
                self.queue.ack(&leased.lease_id).await?;
                warn!(message_id = %message_id, code = %code, "job failed, caller correction required");
            }
        }
        Ok(())
    }

    async fn handle_retryable(
        &self,
        message_id: &str,
        code: &str,
        leased: LeasedDelivery,
    ) -> DeliveryResult<()> {
        // The attempt count is persisted before the requeue, so a crash
        // right here cannot lose it.
        let attempts = self.store.record_failure(message_id, code).await?;
        if attempts < self.config.max_attempts {
            self.audit
                .append(
                    message_id,
                    AuditKind::RetryScheduled,
                    json!({ "attempt": attempts, "code": code }),
                )
                .await?;
            self.queue
                .nack(&leased.lease_id, self.config.retry_backoff)
                .await?;
            info!(message_id = %message_id, attempts, code, "retry scheduled");
        } else {
            self.store.dead_letter(message_id, code).await?;
            self.audit
                .append(
                    message_id,
                    AuditKind::DeadLettered,
                    json!({ "attempts": attempts, "code": code }),
                )
                .await?;
            self.queue.ack(&leased.lease_id).await?;
            warn!(message_id = %message_id, attempts, code, "job dead-lettered");
        }
        Ok(())
    }
}
