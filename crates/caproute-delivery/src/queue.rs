//! The durable queue seam and its in-memory backend.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use caproute_protocol::Envelope;

use crate::error::QueueError;

/// A message waiting for asynchronous execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub message: Envelope,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(message: Envelope) -> Self {
        Self {
            message,
            enqueued_at: Utc::now(),
        }
    }
}

/// A dequeued delivery under a visibility lease.
///
/// The consumer must `ack` or `nack` the lease before it expires; an expired
/// lease puts the delivery back at the front of the queue.
#[derive(Debug, Clone)]
pub struct LeasedDelivery {
    pub lease_id: String,
    pub delivery: Delivery,
}

/// A queue that survives consumer crashes.
///
/// `enqueue` must be durable before it returns: acceptance of a message is
/// only reported to callers after the queue acknowledges. Redelivery of
/// expired leases makes the queue at-least-once; the status store's claim
/// provides the effectively-once execution on top.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError>;

    /// Next ready delivery, if any. Non-blocking.
    async fn dequeue(&self) -> Result<Option<LeasedDelivery>, QueueError>;

    /// Drop the delivery; its lease is consumed.
    async fn ack(&self, lease_id: &str) -> Result<(), QueueError>;

    /// Return the delivery to the queue after `delay`.
    async fn nack(&self, lease_id: &str, delay: Duration) -> Result<(), QueueError>;

    /// Ready plus delayed deliveries; in-flight leases are not counted.
    async fn depth(&self) -> Result<usize, QueueError>;
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeued delivery stays invisible before redelivery.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<Delivery>,
    delayed: Vec<(Instant, Delivery)>,
    inflight: HashMap<String, (Instant, Delivery)>,
}

/// Deterministic in-process queue backend.
///
/// Durable for the lifetime of the process; tests and embedded deployments
/// use it, everything else should pick a persistent backend.
pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    config: QueueConfig,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            config,
        }
    }

    fn promote(inner: &mut QueueInner, now: Instant) {
        let mut idx = 0;
        while idx < inner.delayed.len() {
            if inner.delayed[idx].0 <= now {
                let (_, delivery) = inner.delayed.swap_remove(idx);
                inner.ready.push_back(delivery);
            } else {
                idx += 1;
            }
        }

        let expired: Vec<String> = inner
            .inflight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(lease, _)| lease.clone())
            .collect();
        for lease in expired {
            if let Some((_, delivery)) = inner.inflight.remove(&lease) {
                debug!(
                    message_id = %delivery.message.message_id,
                    "lease expired, redelivering"
                );
                inner.ready.push_front(delivery);
            }
        }
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.ready.push_back(delivery);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<LeasedDelivery>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::promote(&mut inner, now);

        let Some(delivery) = inner.ready.pop_front() else {
            return Ok(None);
        };
        let lease_id = Uuid::new_v4().to_string();
        inner.inflight.insert(
            lease_id.clone(),
            (now + self.config.visibility_timeout, delivery.clone()),
        );
        Ok(Some(LeasedDelivery { lease_id, delivery }))
    }

    async fn ack(&self, lease_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner
            .inflight
            .remove(lease_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownLease(lease_id.to_string()))
    }

    async fn nack(&self, lease_id: &str, delay: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let (_, delivery) = inner
            .inflight
            .remove(lease_id)
            .ok_or_else(|| QueueError::UnknownLease(lease_id.to_string()))?;
        if delay.is_zero() {
            inner.ready.push_back(delivery);
        } else {
            inner.delayed.push((Instant::now() + delay, delivery));
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.ready.len() + inner.delayed.len())
    }
}
