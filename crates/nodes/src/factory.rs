//! The extension point: user policy that produces keys and nodes.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Weak;

use arbor_worker::GenerationToken;
use parking_lot::Mutex;

use crate::error::{Cancelled, NodesError};
use crate::node::Node;

/// Outcome of one [`KeyFactory::create_keys`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysProgress {
	/// Every key has been produced.
	Complete,
	/// More keys follow; the populator calls `create_keys` again.
	Partial,
}

/// Produces the keys and nodes of one tree position.
///
/// Keys identify children across refreshes: two keys that compare equal
/// denote the same child, whatever nodes were created for them.
pub trait KeyFactory: Send + Sync + 'static {
	type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

	/// Slot through which this factory is attached to its populator.
	fn link(&self) -> &FactoryLink<Self::Key>;

	/// Appends keys to `keys`.
	///
	/// Long enumerations should return [`KeysProgress::Partial`] after each
	/// batch. Every [`KeySink::push`] checks for cancellation; propagate its
	/// error with `?` to stop early.
	fn create_keys(&self, keys: &mut KeySink<'_, Self::Key>) -> Result<KeysProgress, Cancelled>;

	/// Creates the nodes shown for `key`. An empty vector hides the key.
	fn create_nodes(&self, key: &Self::Key) -> anyhow::Result<Vec<Node>>;

	/// Placeholder displayed while keys are computed in the background.
	///
	/// Must be built with [`Node::placeholder`].
	fn wait_node(&self) -> Option<Node> {
		None
	}

	/// Called once when the position starts being used.
	fn add_notify(&self) {}

	/// Called once when the position stops being used.
	fn remove_notify(&self) {}

	/// Called with nodes dropped from the tree.
	fn destroy_nodes(&self, nodes: &[Node]) {
		for node in nodes {
			node.notify_destroyed();
		}
	}

	/// Requests recomputation of the key list.
	///
	/// `immediate` recomputes on the calling thread, except on the forest's
	/// dispatch thread, where the request is scheduled instead.
	fn refresh(&self, immediate: bool) {
		self.link().refresh(immediate);
	}
}

/// Output sequence handed to [`KeyFactory::create_keys`].
pub struct KeySink<'a, K> {
	keys: &'a mut Vec<K>,
	token: Option<&'a GenerationToken>,
	on_append: Option<&'a mut dyn FnMut(&[K])>,
}

impl<'a, K> KeySink<'a, K> {
	pub(crate) fn new(keys: &'a mut Vec<K>, token: Option<&'a GenerationToken>, on_append: Option<&'a mut dyn FnMut(&[K])>) -> Self {
		Self { keys, token, on_append }
	}

	/// Appends one key, or reports that the enumeration was cancelled.
	pub fn push(&mut self, key: K) -> Result<(), Cancelled> {
		self.check()?;
		self.keys.push(key);
		if let Some(on_append) = self.on_append.as_mut() {
			on_append(self.keys);
		}
		Ok(())
	}

	/// Appends every key from `keys`, stopping at the first cancellation.
	pub fn extend(&mut self, keys: impl IntoIterator<Item = K>) -> Result<(), Cancelled> {
		for key in keys {
			self.push(key)?;
		}
		Ok(())
	}

	/// Fails if the enumeration was cancelled.
	pub fn check(&self) -> Result<(), Cancelled> {
		if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_some_and(GenerationToken::is_cancelled)
	}

	/// Keys produced so far, across all calls of this enumeration.
	pub fn keys(&self) -> &[K] {
		self.keys
	}

	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}

/// Receives refresh requests routed through a [`FactoryLink`].
pub(crate) trait RefreshTarget<K>: Send + Sync {
	fn refresh(&self, immediate: bool);
	fn refresh_key(&self, key: &K);
}

/// Connects a factory to the one populator it feeds.
///
/// Embed one in each factory and return it from [`KeyFactory::link`].
pub struct FactoryLink<K> {
	target: Mutex<Option<Weak<dyn RefreshTarget<K>>>>,
}

impl<K> Default for FactoryLink<K> {
	fn default() -> Self {
		Self { target: Mutex::new(None) }
	}
}

impl<K> Debug for FactoryLink<K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FactoryLink").field("attached", &self.is_attached()).finish()
	}
}

impl<K> FactoryLink<K> {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn attach(&self, target: Weak<dyn RefreshTarget<K>>) -> Result<(), NodesError> {
		let mut slot = self.target.lock();
		if slot.as_ref().is_some_and(|t| t.strong_count() > 0) {
			return Err(NodesError::FactoryAlreadyAttached);
		}
		*slot = Some(target);
		Ok(())
	}

	/// Returns true while a live populator is attached.
	pub fn is_attached(&self) -> bool {
		self.target.lock().as_ref().is_some_and(|t| t.strong_count() > 0)
	}

	fn upgrade(&self) -> Option<std::sync::Arc<dyn RefreshTarget<K>>> {
		self.target.lock().as_ref().and_then(Weak::upgrade)
	}

	/// Asks the attached populator to recompute the key list.
	pub fn refresh(&self, immediate: bool) {
		match self.upgrade() {
			Some(target) => target.refresh(immediate),
			None => tracing::trace!("factory.refresh.detached"),
		}
	}

	/// Asks the attached populator to recreate the nodes of one key.
	pub fn refresh_key(&self, key: &K) {
		if let Some(target) = self.upgrade() {
			target.refresh_key(key);
		}
	}
}

/// Calls [`KeyFactory::create_nodes`], turning faults into "no nodes".
pub(crate) fn realize<F: KeyFactory>(factory: &F, key: &F::Key) -> Vec<Node> {
	match factory.create_nodes(key) {
		Ok(nodes) => nodes
			.into_iter()
			.filter(|node| {
				if node.is_placeholder() {
					tracing::warn!(key = ?key, node = node.name(), "factory.placeholder_for_key");
					false
				} else {
					true
				}
			})
			.collect(),
		Err(error) => {
			tracing::warn!(key = ?key, error = %error, "factory.create_nodes_failed");
			Vec::new()
		}
	}
}

/// Returns the factory's wait node if it is a proper placeholder.
pub(crate) fn wait_node<F: KeyFactory>(factory: &F) -> Option<Node> {
	let node = factory.wait_node()?;
	if node.is_placeholder() {
		Some(node)
	} else {
		tracing::warn!(node = node.name(), "factory.wait_node_not_placeholder");
		None
	}
}
