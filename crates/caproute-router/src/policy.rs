//! Permission policy hook applied before dispatch.

use caproute_protocol::Envelope;
use caproute_registry::NodeDescriptor;

/// Decides whether a message may be routed to a node.
///
/// The policy runs after capability and extension filtering and before
/// deterministic selection; a candidate the policy rejects is never
/// selected. When every candidate is rejected the decision fails with
/// `E_PERMISSION_DENIED`.
pub trait PermissionPolicy: Send + Sync {
    fn allow(&self, message: &Envelope, node: &NodeDescriptor) -> bool;
}

/// The default policy: everything is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn allow(&self, _message: &Envelope, _node: &NodeDescriptor) -> bool {
        true
    }
}

impl<F> PermissionPolicy for F
where
    F: Fn(&Envelope, &NodeDescriptor) -> bool + Send + Sync,
{
    fn allow(&self, message: &Envelope, node: &NodeDescriptor) -> bool {
        self(message, node)
    }
}
