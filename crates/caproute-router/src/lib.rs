//! # Caproute Router
//!
//! The deterministic routing pipeline: given a validated envelope and the
//! live node registry, pick exactly one node and dispatch to it.
//!
//! The pipeline runs fixed stages in a fixed order: protocol filter, adapter
//! chain, capability filter, planner fallback (at most once), required
//! extensions, permission policy, deterministic selection, trace hop,
//! dispatch. The same inputs always produce the same decision regardless of
//! registration order.

pub mod adapter;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod policy;
pub mod router;
pub mod select;
pub mod version;

pub use adapter::{Adapter, AdapterChain};
pub use dispatch::{DispatchError, Dispatcher};
pub use error::{RouteError, RouteResult};
pub use handler::{CapabilityHandler, FnHandler, HandlerDispatcher, HandlerError};
pub use policy::{AllowAll, PermissionPolicy};
pub use router::{PLAN_ROUTE_INTENT, RouteContext, Router, RouterConfig};
pub use select::{select_best, selection_order};
pub use version::NodeVersion;
