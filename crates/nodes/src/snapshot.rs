use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::node::Node;

/// Immutable, ordered view of a position's children at one instant.
///
/// Cloning shares the underlying array; reading never takes a lock.
#[derive(Clone)]
pub struct Snapshot {
	nodes: Arc<[Node]>,
}

impl Snapshot {
	pub fn empty() -> Self {
		Self { nodes: Arc::from(Vec::new()) }
	}

	/// Returns the node names in order.
	pub fn names(&self) -> Vec<String> {
		self.nodes.iter().map(|n| n.name().to_string()).collect()
	}

	/// Returns true if both snapshots share the same array.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.nodes, &other.nodes)
	}
}

impl Default for Snapshot {
	fn default() -> Self {
		Self::empty()
	}
}

impl Deref for Snapshot {
	type Target = [Node];

	fn deref(&self) -> &[Node] {
		&self.nodes
	}
}

impl From<Vec<Node>> for Snapshot {
	fn from(nodes: Vec<Node>) -> Self {
		Self { nodes: Arc::from(nodes) }
	}
}

impl PartialEq for Snapshot {
	fn eq(&self, other: &Self) -> bool {
		self.nodes[..] == other.nodes[..]
	}
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.nodes.iter().map(Node::name)).finish()
	}
}
