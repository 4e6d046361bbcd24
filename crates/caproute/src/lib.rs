//! # Caproute
//!
//! Capability-based message routing with durable asynchronous delivery.
//!
//! Nodes register what they can do; callers say what they want done. The
//! router deterministically picks one node per message, bridging protocol
//! versions with adapters and falling back to a planner when no capability
//! matches. The delivery layer accepts messages durably, executes them
//! exactly one effective time through the same router, and keeps a
//! replayable audit trail.
//!
//! This crate re-exports the public surface of the member crates:
//!
//! - [`protocol`] — envelope, error codes, extensions, validation
//! - [`registry`] — node descriptors and the live registry
//! - [`router`] — the deterministic routing pipeline
//! - [`delivery`] — queue, worker, status store, audit log, gateway
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use caproute::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Arc::new(NodeRegistry::default());
//! registry
//!     .register(
//!         NodeDescriptor::new(NodeId::parse("echo-node").unwrap(), "1.0.0")
//!             .with_protocols([PROTOCOL_VERSION])
//!             .with_capabilities(["echo"]),
//!     )
//!     .unwrap();
//!
//! let mut handlers = HandlerDispatcher::new();
//! handlers.register_fn("echo", Ok).unwrap();
//! let router = Router::new(registry, Arc::new(handlers));
//!
//! let reply = router
//!     .route(&json!({
//!         "protocol_version": PROTOCOL_VERSION,
//!         "message_id": "m-1",
//!         "intent": "echo",
//!         "payload": { "text": "hi" },
//!     }))
//!     .await;
//! assert!(!reply.is_error());
//! # }
//! ```

pub use caproute_delivery as delivery;
pub use caproute_protocol as protocol;
pub use caproute_registry as registry;
pub use caproute_router as router;

/// The common imports for embedding caproute.
pub mod prelude {
    pub use crate::delivery::{
        AcceptGateway, Accepted, AuditKind, AuditLog, DurableQueue, GatewayConfig,
        InMemoryAuditLog, InMemoryQueue, InMemoryStatusStore, JobExecutor, JobState, JobStatus,
        StatusStore, Worker, WorkerConfig,
    };
    pub use crate::protocol::{
        Envelope, ErrorCode, Identity, PROTOCOL_VERSION, Trace, WireError,
    };
    pub use crate::registry::{NodeDescriptor, NodeId, NodeRegistry, RegistryConfig};
    pub use crate::router::{
        Adapter, AdapterChain, CapabilityHandler, DispatchError, Dispatcher, HandlerDispatcher,
        PermissionPolicy, RouteError, Router, RouterConfig,
    };
}
