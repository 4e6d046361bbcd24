//! Idempotency and status store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use caproute_protocol::Envelope;

use crate::error::StoreError;
use crate::job::{JobRecord, JobState};

/// Result of trying to create a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// First time this message_id was seen
    Created(JobRecord),
    /// Already known; the existing record
    Existing(JobRecord),
}

/// Result of an execution claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This consumer holds the claim and must execute
    Claimed(JobRecord),
    /// Another consumer holds an unexpired claim
    Busy,
    /// The job already reached a terminal state; do not execute
    Terminal(JobRecord),
}

/// The shared job-record store.
///
/// This store is the idempotency authority: the atomic `claim` is what
/// guarantees at most one side-effecting execution per message_id, even with
/// concurrent consumers and redelivered messages. Terminal records
/// (`completed`, `dlq`) are immutable.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create a `queued` record unless the message_id is already known.
    async fn create_if_absent(&self, message_id: &str) -> Result<CreateOutcome, StoreError>;

    async fn get(&self, message_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Atomically claim the job for execution.
    ///
    /// Exactly one of two racing consumers gets `Claimed`; the claim holds
    /// for `ttl` so a crashed consumer's claim expires. A successful claim
    /// moves the job to `processing`.
    async fn claim(&self, message_id: &str, ttl: Duration) -> Result<ClaimOutcome, StoreError>;

    /// Record the final result and move to `completed`.
    async fn complete(&self, message_id: &str, result: Envelope) -> Result<(), StoreError>;

    /// Persist a failed attempt: bump the attempt count, record the error,
    /// release the claim, and move back to `queued`. Returns the new count.
    async fn record_failure(&self, message_id: &str, error: &str) -> Result<u32, StoreError>;

    /// Move to the terminal `dlq` state.
    async fn dead_letter(&self, message_id: &str, error: &str) -> Result<(), StoreError>;

    /// Move to the non-retryable `error` state.
    async fn mark_error(&self, message_id: &str, error: &str) -> Result<(), StoreError>;
}

/// In-process store on a concurrent map; shard locks make each mutation
/// atomic, which is all `claim` needs.
#[derive(Default)]
pub struct InMemoryStatusStore {
    records: DashMap<String, JobRecord>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(
        &self,
        message_id: &str,
        apply: impl FnOnce(&mut JobRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut entry = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::UnknownJob(message_id.to_string()))?;
        if entry.state.is_terminal() {
            return Err(StoreError::TerminalState(message_id.to_string()));
        }
        let out = apply(&mut entry)?;
        entry.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create_if_absent(&self, message_id: &str) -> Result<CreateOutcome, StoreError> {
        let entry = self.records.entry(message_id.to_string());
        match entry {
            dashmap::Entry::Occupied(occupied) => {
                Ok(CreateOutcome::Existing(occupied.get().clone()))
            }
            dashmap::Entry::Vacant(vacant) => {
                let record = JobRecord::new(message_id);
                vacant.insert(record.clone());
                Ok(CreateOutcome::Created(record))
            }
        }
    }

    async fn get(&self, message_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.get(message_id).map(|r| r.clone()))
    }

    async fn claim(&self, message_id: &str, ttl: Duration) -> Result<ClaimOutcome, StoreError> {
        let mut entry = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::UnknownJob(message_id.to_string()))?;

        if entry.state.is_terminal() {
            return Ok(ClaimOutcome::Terminal(entry.clone()));
        }
        let now = Utc::now();
        if let Some(expires) = entry.claim_expires_at
            && entry.state == JobState::Processing
            && expires > now
        {
            return Ok(ClaimOutcome::Busy);
        }

        entry.state = JobState::Processing;
        entry.claim_expires_at = now
            .checked_add_signed(chrono::Duration::from_std(ttl).unwrap_or_default())
            .or(Some(now));
        entry.updated_at = now;
        debug!(message_id, "claimed for execution");
        Ok(ClaimOutcome::Claimed(entry.clone()))
    }

    async fn complete(&self, message_id: &str, result: Envelope) -> Result<(), StoreError> {
        self.update(message_id, |record| {
            record.state = JobState::Completed;
            record.result = Some(result);
            record.claim_expires_at = None;
            Ok(())
        })
    }

    async fn record_failure(&self, message_id: &str, error: &str) -> Result<u32, StoreError> {
        self.update(message_id, |record| {
            record.attempt_count += 1;
            record.last_error = Some(error.to_string());
            record.claim_expires_at = None;
            record.state = JobState::Queued;
            Ok(record.attempt_count)
        })
    }

    async fn dead_letter(&self, message_id: &str, error: &str) -> Result<(), StoreError> {
        self.update(message_id, |record| {
            record.state = JobState::Dlq;
            record.last_error = Some(error.to_string());
            record.claim_expires_at = None;
            Ok(())
        })
    }

    async fn mark_error(&self, message_id: &str, error: &str) -> Result<(), StoreError> {
        self.update(message_id, |record| {
            record.state = JobState::Error;
            record.last_error = Some(error.to_string());
            record.claim_expires_at = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let store = InMemoryStatusStore::new();
        let first = store.create_if_absent("m-1").await.unwrap();
        let second = store.create_if_absent("m-1").await.unwrap();
        assert!(matches!(first, CreateOutcome::Created(_)));
        assert!(matches!(second, CreateOutcome::Existing(_)));
    }

    #[tokio::test]
    async fn test_claim_moves_to_processing() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();

        let outcome = store.claim("m-1", TTL).await.unwrap();
        let ClaimOutcome::Claimed(record) = outcome else {
            panic!("expected claim to succeed");
        };
        assert_eq!(record.state, JobState::Processing);
        assert!(record.claim_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_second_claim_is_busy() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();
        store.claim("m-1", TTL).await.unwrap();

        assert_eq!(store.claim("m-1", TTL).await.unwrap(), ClaimOutcome::Busy);
    }

    #[tokio::test]
    async fn test_expired_claim_can_be_reclaimed() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();
        store.claim("m-1", Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            store.claim("m-1", TTL).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn test_claim_after_completion_is_terminal() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();
        store.claim("m-1", TTL).await.unwrap();
        store
            .complete("m-1", Envelope::new("0.1", "echo", json!({})))
            .await
            .unwrap();

        let outcome = store.claim("m-1", TTL).await.unwrap();
        let ClaimOutcome::Terminal(record) = outcome else {
            panic!("expected terminal outcome");
        };
        assert_eq!(record.state, JobState::Completed);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_are_immutable() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();
        store.dead_letter("m-1", "E_NODE_TIMEOUT").await.unwrap();

        assert!(matches!(
            store.mark_error("m-1", "E_INTERNAL").await,
            Err(StoreError::TerminalState(_))
        ));
        assert!(matches!(
            store.record_failure("m-1", "E_NODE_TIMEOUT").await,
            Err(StoreError::TerminalState(_))
        ));
        let record = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Dlq);
    }

    #[tokio::test]
    async fn test_record_failure_persists_count_and_releases_claim() {
        let store = InMemoryStatusStore::new();
        store.create_if_absent("m-1").await.unwrap();
        store.claim("m-1", TTL).await.unwrap();

        let attempts = store.record_failure("m-1", "E_NODE_TIMEOUT").await.unwrap();
        assert_eq!(attempts, 1);
        let record = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert!(record.claim_expires_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some("E_NODE_TIMEOUT"));

        store.claim("m-1", TTL).await.unwrap();
        let attempts = store.record_failure("m-1", "E_NODE_TIMEOUT").await.unwrap();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = InMemoryStatusStore::new();
        assert!(matches!(
            store.claim("nope", TTL).await,
            Err(StoreError::UnknownJob(_))
        ));
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
