//! Children whose keys are set by the caller rather than enumerated.

use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::children::Children;
use crate::entries::EntrySupport;
use crate::forest::Forest;
use crate::node::Node;
use crate::populator::{CreateNodes, ListPopulator, Populator};

/// Keyed children driven by explicit [`Self::set_keys`] calls.
///
/// Every new list is diffed against the previous one like a factory's
/// enumeration. Lists set while the children are unused are stored quietly
/// and shown on first use; deactivation clears the nodes but keeps the list.
///
/// Clones share the same entries.
pub struct KeyedChildren<K>
where
	K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	support: Arc<EntrySupport<K>>,
	populator: Arc<ListPopulator<K>>,
}

impl<K> KeyedChildren<K>
where
	K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	/// Creates empty children; `create_nodes` realizes the nodes of one key.
	pub fn new(forest: &Forest, create_nodes: impl Fn(&K) -> Vec<Node> + Send + Sync + 'static) -> Self {
		let create: Arc<CreateNodes<K>> = Arc::new(create_nodes);
		let populator = Arc::new(ListPopulator::new(create));
		let driver = populator.clone();
		let support = EntrySupport::new(forest.clone(), move |support| -> Arc<dyn Populator<K>> {
			driver.bind(support);
			driver
		});
		tracing::debug!("children.keyed.create");
		Self { support, populator }
	}

	/// Replaces the key list. Duplicates keep their first position.
	pub fn set_keys(&self, keys: impl IntoIterator<Item = K>) {
		let keys: Vec<K> = keys.into_iter().collect();
		self.populator.update(move |current| *current = keys);
	}

	/// Edits the key list in place and commits the result.
	pub fn update(&self, edit: impl FnOnce(&mut Vec<K>)) {
		self.populator.update(edit);
	}

	/// The key list last set, whether or not it is shown yet.
	pub fn keys(&self) -> Vec<K> {
		self.populator.keys()
	}

	/// Recreates the nodes of `key`, leaving every other entry alone.
	pub fn refresh_key(&self, key: &K) {
		self.support.refresh_entry(key);
	}

	/// A [`Children`] view over these entries, for [`Node::new`].
	///
	/// The first node built from it becomes the owner; later views show the
	/// same nodes but do not re-parent them.
	pub fn children(&self) -> Children {
		Children::keyed(self.support.clone())
	}
}

impl<K> Clone for KeyedChildren<K>
where
	K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	fn clone(&self) -> Self {
		Self {
			support: self.support.clone(),
			populator: self.populator.clone(),
		}
	}
}

impl<K> fmt::Debug for KeyedChildren<K>
where
	K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyedChildren")
			.field("keys", &self.populator.keys())
			.field("active", &self.support.is_active())
			.finish()
	}
}

/// Children listing explicitly added nodes, in insertion order.
///
/// Each node is its own key; adding a node twice keeps one copy.
#[derive(Clone, Debug)]
pub struct ChildArray {
	keyed: KeyedChildren<Node>,
}

impl ChildArray {
	pub fn new(forest: &Forest) -> Self {
		Self {
			keyed: KeyedChildren::new(forest, |node: &Node| vec![node.clone()]),
		}
	}

	/// Appends the given nodes that are not listed yet.
	pub fn add(&self, nodes: impl IntoIterator<Item = Node>) {
		self.keyed.update(|current| {
			for node in nodes {
				if !current.contains(&node) {
					current.push(node);
				}
			}
		});
	}

	/// Removes `nodes`. Returns false if none of them was present.
	pub fn remove(&self, nodes: &[Node]) -> bool {
		let mut changed = false;
		self.keyed.update(|current| {
			let before = current.len();
			current.retain(|node| !nodes.contains(node));
			changed = current.len() != before;
		});
		changed
	}

	/// The nodes added so far, in order.
	pub fn nodes(&self) -> Vec<Node> {
		self.keyed.keys()
	}

	pub fn children(&self) -> Children {
		self.keyed.children()
	}
}
