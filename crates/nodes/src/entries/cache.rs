//! Per-position cache of realized child nodes.
//!
//! Slots are keyed by entry handles. While the position is displayed the
//! cache holds its nodes strongly; [`NodeCache::clear`] demotes every slot to
//! weak references so the nodes can be dropped once nothing outside the tree
//! uses them, and [`NodeCache::sweep`] evicts the slots whose nodes are gone.

use slotmap::SecondaryMap;

use super::EntryId;
use crate::error::ConsistencyFault;
use crate::node::{Node, WeakNode};
use crate::snapshot::Snapshot;

/// How the cache currently retains its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retention {
	/// Nodes are held; the realized array is available.
	Held,
	/// Nodes are only weakly referenced, pending re-materialization or sweep.
	Released,
}

enum Slot {
	Strong(Vec<Node>),
	Weak(Vec<WeakNode>),
}

impl Slot {
	fn upgrade(&self) -> Option<Vec<Node>> {
		match self {
			Self::Strong(nodes) => Some(nodes.clone()),
			Self::Weak(weak) => weak.iter().map(WeakNode::upgrade).collect(),
		}
	}

	fn live(&self) -> Vec<Node> {
		match self {
			Self::Strong(nodes) => nodes.clone(),
			Self::Weak(weak) => weak.iter().filter_map(WeakNode::upgrade).collect(),
		}
	}
}

pub(crate) struct NodeCache {
	slots: SecondaryMap<EntryId, Slot>,
	retention: Retention,
	realized: Option<Snapshot>,
}

impl Default for NodeCache {
	fn default() -> Self {
		Self {
			slots: SecondaryMap::new(),
			retention: Retention::Held,
			realized: None,
		}
	}
}

impl NodeCache {
	/// Returns the cached nodes of `entry`.
	///
	/// `Ok(None)` means the nodes must be (re)computed: there is no slot, or a
	/// weak slot lost some of its nodes. With `must_exist` a missing slot is a
	/// bookkeeping fault instead.
	pub(crate) fn nodes_for(&mut self, entry: EntryId, must_exist: bool) -> Result<Option<Vec<Node>>, ConsistencyFault> {
		let Some(slot) = self.slots.get_mut(entry) else {
			if must_exist {
				return Err(ConsistencyFault::MissingCacheEntry { entry: format!("{entry:?}") });
			}
			return Ok(None);
		};
		let nodes = slot.upgrade();
		if let Some(nodes) = &nodes
			&& self.retention == Retention::Held
		{
			*slot = Slot::Strong(nodes.clone());
		}
		Ok(nodes)
	}

	pub(crate) fn insert(&mut self, entry: EntryId, nodes: Vec<Node>) {
		let slot = match self.retention {
			Retention::Held => Slot::Strong(nodes),
			Retention::Released => Slot::Weak(nodes.iter().map(Node::downgrade).collect()),
		};
		self.slots.insert(entry, slot);
	}

	/// Drops the slot of `entry`, returning the nodes still alive.
	pub(crate) fn remove(&mut self, entry: EntryId) -> Vec<Node> {
		self.slots.remove(entry).map(|slot| slot.live()).unwrap_or_default()
	}

	/// Recomputes the realized array from the slots of `order`.
	///
	/// Entries without a slot contribute nothing.
	pub(crate) fn rebuild(&mut self, order: &[EntryId]) -> Snapshot {
		let mut nodes = Vec::new();
		for id in order {
			if let Some(slot) = self.slots.get(*id) {
				nodes.extend(slot.live());
			}
		}
		let snapshot = Snapshot::from(nodes);
		self.realized = Some(snapshot.clone());
		snapshot
	}

	pub(crate) fn snapshot(&self) -> Option<Snapshot> {
		self.realized.clone()
	}

	/// Drops the realized array and demotes all slots to weak references.
	pub(crate) fn clear(&mut self) {
		self.realized = None;
		self.retention = Retention::Released;
		for (_, slot) in self.slots.iter_mut() {
			if let Slot::Strong(nodes) = slot {
				*slot = Slot::Weak(nodes.iter().map(Node::downgrade).collect());
			}
		}
	}

	/// Switches back to strong retention. Slots are promoted by [`Self::nodes_for`].
	pub(crate) fn hold(&mut self) {
		self.retention = Retention::Held;
	}

	pub(crate) fn retention(&self) -> Retention {
		self.retention
	}

	/// Evicts weak slots none of whose nodes are alive. Returns the number evicted.
	pub(crate) fn sweep(&mut self) -> usize {
		let before = self.slots.len();
		self.slots.retain(|_, slot| match slot {
			Slot::Strong(_) => true,
			Slot::Weak(weak) => !weak.is_empty() && weak.iter().any(|w| w.upgrade().is_some()),
		});
		before - self.slots.len()
	}

	/// Returns true if no slot holds a live node.
	pub(crate) fn is_vacant(&self) -> bool {
		self.slots.values().all(|slot| slot.live().is_empty())
	}

	/// Drops every slot and the realized array.
	pub(crate) fn reset(&mut self) -> Vec<Node> {
		self.realized = None;
		let live = self.slots.values().flat_map(Slot::live).collect();
		self.slots.clear();
		live
	}
}
