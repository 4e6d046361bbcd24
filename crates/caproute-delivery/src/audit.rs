//! Append-only audit log of job lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Lifecycle event kinds, in the order a successful job emits them:
/// `Enqueued`, `WorkerReceive`, `WorkerComplete`. Retrying jobs interleave
/// `RetryScheduled` and end in `DeadLettered` when attempts run out;
/// redeliveries of finished jobs log `DuplicateDelivery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Enqueued,
    WorkerReceive,
    WorkerComplete,
    RetryScheduled,
    DeadLettered,
    DuplicateDelivery,
    WorkerError,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::Enqueued => "enqueued",
            AuditKind::WorkerReceive => "worker_receive",
            AuditKind::WorkerComplete => "worker_complete",
            AuditKind::RetryScheduled => "retry_scheduled",
            AuditKind::DeadLettered => "dead_lettered",
            AuditKind::DuplicateDelivery => "duplicate_delivery",
            AuditKind::WorkerError => "worker_error",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry. `seq` is globally unique and monotonic, so the relative
/// order of any two events is recoverable even across jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub message_id: String,
    pub kind: AuditKind,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub details: Value,
}

/// Append-only event log, keyed by message_id.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(
        &self,
        message_id: &str,
        kind: AuditKind,
        details: Value,
    ) -> Result<(), StoreError>;

    /// Events for one job, in append order.
    async fn events(&self, message_id: &str) -> Result<Vec<AuditEvent>, StoreError>;
}

/// In-process audit log.
#[derive(Default)]
pub struct InMemoryAuditLog {
    events: DashMap<String, Vec<AuditEvent>>,
    seq: AtomicU64,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(
        &self,
        message_id: &str,
        kind: AuditKind,
        details: Value,
    ) -> Result<(), StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        // The shard lock orders the push with the seq we just took.
        self.events
            .entry(message_id.to_string())
            .or_default()
            .push(AuditEvent {
                seq,
                message_id: message_id.to_string(),
                kind,
                at: Utc::now(),
                details,
            });
        Ok(())
    }

    async fn events(&self, message_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .events
            .get(message_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }
}
