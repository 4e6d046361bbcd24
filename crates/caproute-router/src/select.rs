//! Deterministic node selection.

use std::cmp::Ordering;

use caproute_registry::NodeDescriptor;

use crate::version::NodeVersion;

/// Total preference order between two candidate nodes.
///
/// Higher `priority` wins, then higher [`NodeVersion`], then the
/// lexicographically smallest `node_id`. Because node ids are unique within
/// a registry, two distinct candidates never compare equal, so selection
/// does not depend on input order.
pub fn selection_order(a: &NodeDescriptor, b: &NodeDescriptor) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            NodeVersion::parse(&b.node_version).cmp(&NodeVersion::parse(&a.node_version))
        })
        .then_with(|| a.node_id.cmp(&b.node_id))
}

/// Pick the single best candidate, if any.
pub fn select_best(candidates: &[NodeDescriptor]) -> Option<&NodeDescriptor> {
    candidates.iter().min_by(|a, b| selection_order(a, b))
}
