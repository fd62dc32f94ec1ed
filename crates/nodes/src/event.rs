//! Structural change notifications delivered to node listeners.

use crate::node::Node;
use crate::snapshot::Snapshot;

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
	pub(crate) const fn new(raw: u64) -> Self {
		Self(raw)
	}
}

/// One committed structural change.
///
/// Index arrays are sorted ascending. Events for one commit arrive in the
/// order removed, reordered, added; each carries the snapshot that was
/// current right after that step.
#[derive(Debug, Clone)]
pub enum NodeEvent {
	ChildrenAdded {
		added: Vec<Node>,
		indices: Vec<usize>,
		snapshot_after: Snapshot,
	},
	ChildrenRemoved {
		removed: Vec<Node>,
		indices: Vec<usize>,
		snapshot_before: Snapshot,
		snapshot_after: Snapshot,
	},
	/// `permutation[i]` is the new index of the child formerly at `i`.
	ChildrenReordered {
		permutation: Vec<usize>,
		snapshot_after: Snapshot,
	},
	NodeDestroyed {
		node: Node,
	},
}

/// Receives [`NodeEvent`]s for one node.
///
/// Listeners run synchronously on the mutating thread while it holds write
/// access to the tree lock; they may read the tree and post further writes.
pub trait NodeListener: Send + Sync {
	fn on_event(&self, event: &NodeEvent);
}

impl<F> NodeListener for F
where
	F: Fn(&NodeEvent) + Send + Sync,
{
	fn on_event(&self, event: &NodeEvent) {
		self(event)
	}
}
