//! # Caproute Delivery
//!
//! The asynchronous delivery layer: accept a message now, execute it later,
//! exactly one effective time.
//!
//! Submissions enter through the [`AcceptGateway`], which validates, records
//! a job, and durably enqueues before acknowledging. A [`Worker`] consumes
//! the [`DurableQueue`] under visibility leases, claims each job atomically
//! in the [`StatusStore`], executes it through a [`JobExecutor`] (the router,
//! in the full system), and drives it to `completed`, `error`, or `dlq`.
//! Every lifecycle step lands in the [`AuditLog`], replayable per message.
//!
//! The in-memory backends are deterministic and dependency-free; enable the
//! `redis` feature for a Redis-backed queue.

pub mod audit;
pub mod error;
pub mod gateway;
pub mod job;
pub mod queue;
pub mod status;
pub mod worker;

#[cfg(feature = "redis")]
pub mod redis;

pub use audit::{AuditEvent, AuditKind, AuditLog, InMemoryAuditLog};
pub use error::{DeliveryError, DeliveryResult, QueueError, StoreError};
pub use gateway::{Accepted, AcceptGateway, GatewayConfig};
pub use job::{JobRecord, JobState, JobStatus};
pub use queue::{Delivery, DurableQueue, InMemoryQueue, LeasedDelivery, QueueConfig};
pub use status::{ClaimOutcome, CreateOutcome, InMemoryStatusStore, StatusStore};
pub use worker::{JobExecutor, Worker, WorkerConfig};

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisQueue};
