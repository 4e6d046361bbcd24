//! Job lifecycle state and the durable job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caproute_protocol::Envelope;

/// Lifecycle state of an accepted message.
///
/// Transitions: `Queued -> Processing -> { Completed | Error | Dlq }`, with
/// `Processing -> Queued` on a scheduled retry. `Completed` and `Dlq` are
/// terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Error,
    Dlq,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dlq)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Dlq => "dlq",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted record for one message_id.
///
/// `attempt_count` is bumped in the store before a retry is requeued, so a
/// crash between requeue and redelivery neither loses nor duplicates the
/// count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub message_id: String,
    pub state: JobState,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub result: Option<Envelope>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(message_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            state: JobState::Queued,
            attempt_count: 0,
            last_error: None,
            result: None,
            claim_expires_at: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Caller-facing view of this record.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            attempts: self.attempt_count,
            last_error: self.last_error.clone(),
            result: self.result.clone(),
        }
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<Envelope>,
}
