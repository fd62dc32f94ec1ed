use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Populator, PopulatorPhase};
use crate::entries::{DisplayKey, EntryKey, EntrySupport};
use crate::node::Node;

pub(crate) type CreateNodes<K> = dyn Fn(&K) -> Vec<Node> + Send + Sync;

/// Forwards a caller-maintained key list; there is nothing to enumerate.
///
/// The stored list outlives deactivation, so the next activation shows the
/// same keys again.
pub(crate) struct ListPopulator<K: EntryKey> {
	create: Arc<CreateNodes<K>>,
	keys: Mutex<Vec<K>>,
	generation: Arc<AtomicU64>,
	support: OnceLock<Weak<EntrySupport<K>>>,
}

impl<K: EntryKey> ListPopulator<K> {
	pub(crate) fn new(create: Arc<CreateNodes<K>>) -> Self {
		Self {
			create,
			keys: Mutex::new(Vec::new()),
			generation: Arc::new(AtomicU64::new(0)),
			support: OnceLock::new(),
		}
	}

	pub(crate) fn bind(&self, support: Weak<EntrySupport<K>>) {
		let _ = self.support.set(support);
	}

	pub(crate) fn keys(&self) -> Vec<K> {
		self.keys.lock().clone()
	}

	/// Edits the stored list, then commits it.
	pub(crate) fn update(&self, edit: impl FnOnce(&mut Vec<K>)) {
		let (keys, seen) = {
			let mut keys = self.keys.lock();
			edit(&mut keys);
			(keys.clone(), self.next_generation())
		};
		self.forward(keys, seen);
	}

	/// Commits the stored list again, or an empty one when `clear`.
	fn reforward(&self, clear: bool) {
		let (keys, seen) = {
			let keys = self.keys.lock();
			let list = if clear { Vec::new() } else { keys.clone() };
			(list, self.next_generation())
		};
		self.forward(keys, seen);
	}

	/// Generations are taken under the key lock, so a later edit always
	/// carries a later generation.
	fn next_generation(&self) -> u64 {
		self.generation.fetch_add(1, Ordering::AcqRel) + 1
	}

	fn forward(&self, keys: Vec<K>, seen: u64) {
		let Some(support) = self.support.get().and_then(Weak::upgrade) else {
			return;
		};
		let generation = self.generation.clone();
		tracing::trace!(count = keys.len(), generation = seen, "populator.list.forward");
		support.set_keys(DisplayKey::list(&keys, false), move || generation.load(Ordering::Acquire) == seen);
	}
}

impl<K: EntryKey> Populator<K> for ListPopulator<K> {
	fn activate(&self) {
		self.reforward(false);
	}

	fn deactivate(&self) {
		self.reforward(true);
	}

	fn refresh(&self, _immediate: bool) {
		self.reforward(false);
	}

	fn await_quiescent(&self, _timeout: Option<Duration>) {}

	fn create_nodes(&self, key: &K) -> Vec<Node> {
		(self.create)(key)
			.into_iter()
			.filter(|node| {
				if node.is_placeholder() {
					tracing::warn!(key = ?key, node = node.name(), "populator.list.placeholder_for_key");
				}
				!node.is_placeholder()
			})
			.collect()
	}

	fn wait_node(&self) -> Option<Node> {
		None
	}

	fn destroy_nodes(&self, nodes: &[Node]) {
		for node in nodes {
			node.notify_destroyed();
		}
	}

	fn is_initialized(&self) -> bool {
		true
	}

	fn phase(&self) -> Option<PopulatorPhase> {
		None
	}
}
