//! Redis-backed durable queue.
//!
//! Layout: a ready list, a delayed sorted set scored by due time, and a
//! lease hash keyed by lease id. Leases carry their visibility deadline in
//! the stored value, so any consumer can sweep expired leases back into the
//! ready list.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{Delivery, DurableQueue, LeasedDelivery, QueueConfig};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. "redis://localhost:6379"
    pub url: String,
    /// Key prefix so multiple deployments can share an instance.
    pub namespace: String,
    pub queue: QueueConfig,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "caproute".to_string(),
            queue: QueueConfig::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct LeaseEntry {
    deadline_ms: i64,
    delivery: Delivery,
}

/// Durable queue on Redis.
pub struct RedisQueue {
    pool: deadpool_redis::Pool,
    config: RedisConfig,
}

impl RedisQueue {
    pub async fn connect(config: RedisConfig) -> Result<Self, QueueError> {
        let redis_config = deadpool_redis::Config::from_url(&config.url);
        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("PING failed: {e}")))?;

        debug!(url = %config.url, "redis queue connected");
        Ok(Self { pool, config })
    }

    async fn get_connection(&self) -> Result<deadpool_redis::Connection, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))
    }

    fn ready_key(&self) -> String {
        format!("{}:queue:ready", self.config.namespace)
    }

    fn delayed_key(&self) -> String {
        format!("{}:queue:delayed", self.config.namespace)
    }

    fn leases_key(&self) -> String {
        format!("{}:queue:leases", self.config.namespace)
    }

    /// Move due delayed deliveries and expired leases back to ready.
    async fn sweep(&self, conn: &mut deadpool_redis::Connection) -> Result<(), QueueError> {
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), f64::MIN, now_ms as f64)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        for json in due {
            conn.zrem::<_, _, ()>(self.delayed_key(), &json)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            conn.rpush::<_, _, ()>(self.ready_key(), json)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }

        let leases: Vec<(String, String)> = conn
            .hgetall(self.leases_key())
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        for (lease_id, json) in leases {
            let Ok(entry) = serde_json::from_str::<LeaseEntry>(&json) else {
                continue;
            };
            if entry.deadline_ms <= now_ms {
                debug!(
                    message_id = %entry.delivery.message.message_id,
                    "lease expired, redelivering"
                );
                conn.hdel::<_, _, ()>(self.leases_key(), &lease_id)
                    .await
                    .map_err(|e| QueueError::Backend(e.to_string()))?;
                let delivery_json = serde_json::to_string(&entry.delivery)
                    .map_err(|e| QueueError::Backend(e.to_string()))?;
                conn.rpush::<_, _, ()>(self.ready_key(), delivery_json)
                    .await
                    .map_err(|e| QueueError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn take_lease(&self, lease_id: &str) -> Result<LeaseEntry, QueueError> {
        let mut conn = self.get_connection().await?;
        let json: Option<String> = conn
            .hget(self.leases_key(), lease_id)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let json = json.ok_or_else(|| QueueError::UnknownLease(lease_id.to_string()))?;
        conn.hdel::<_, _, ()>(self.leases_key(), lease_id)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| QueueError::Backend(e.to_string()))
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        let json =
            serde_json::to_string(&delivery).map_err(|e| QueueError::Backend(e.to_string()))?;
        let mut conn = self.get_connection().await?;
        conn.lpush::<_, _, ()>(self.ready_key(), json)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        debug!(message_id = %delivery.message.message_id, "enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<LeasedDelivery>, QueueError> {
        let mut conn = self.get_connection().await?;
        self.sweep(&mut conn).await?;

        let json: Option<String> = conn
            .rpop(self.ready_key(), None)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let Some(json) = json else {
            return Ok(None);
        };
        let delivery: Delivery =
            serde_json::from_str(&json).map_err(|e| QueueError::Backend(e.to_string()))?;

        let lease_id = Uuid::new_v4().to_string();
        let deadline_ms = Utc::now().timestamp_millis()
            + self.config.queue.visibility_timeout.as_millis() as i64;
        let entry = LeaseEntry {
            deadline_ms,
            delivery: delivery.clone(),
        };
        let entry_json =
            serde_json::to_string(&entry).map_err(|e| QueueError::Backend(e.to_string()))?;
        conn.hset::<_, _, _, ()>(self.leases_key(), &lease_id, entry_json)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(Some(LeasedDelivery { lease_id, delivery }))
    }

    async fn ack(&self, lease_id: &str) -> Result<(), QueueError> {
        self.take_lease(lease_id).await.map(|_| ())
    }

    async fn nack(&self, lease_id: &str, delay: Duration) -> Result<(), QueueError> {
        let entry = self.take_lease(lease_id).await?;
        let json = serde_json::to_string(&entry.delivery)
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let mut conn = self.get_connection().await?;
        if delay.is_zero() {
            conn.lpush::<_, _, ()>(self.ready_key(), json)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        } else {
            let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            conn.zadd::<_, _, _, ()>(self.delayed_key(), json, due_ms as f64)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.get_connection().await?;
        let ready: usize = conn
            .llen(self.ready_key())
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let delayed: usize = conn
            .zcard(self.delayed_key())
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(ready + delayed)
    }
}
