//! Authoritative key to node bookkeeping for one tree position.
//!
//! An [`EntrySupport`] owns the ordered entry list, the node cache, and the
//! diffing that turns one committed key list into the next. Every mutation
//! runs under the forest's write access; listeners are notified from inside
//! that critical section, never while the internal state mutex is held.

mod cache;
mod diff;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use self::cache::{NodeCache, Retention};
use crate::error::ConsistencyFault;
use crate::event::NodeEvent;
use crate::factory::RefreshTarget;
use crate::forest::Forest;
use crate::node::{Node, WeakNode};
use crate::populator::{Populator, PopulatorPhase};
use crate::snapshot::Snapshot;

slotmap::new_key_type! {
	/// Stable handle of one entry.
	pub(crate) struct EntryId;
}

/// Bounds every factory key satisfies.
pub(crate) trait EntryKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> EntryKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Key of one displayed position: a factory key or the placeholder slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DisplayKey<K> {
	Key(K),
	Wait,
}

impl<K: Clone> DisplayKey<K> {
	/// Wraps `keys`, optionally followed by the placeholder slot.
	pub(crate) fn list(keys: &[K], wait: bool) -> Vec<Self> {
		let mut list: Vec<Self> = keys.iter().cloned().map(Self::Key).collect();
		if wait {
			list.push(Self::Wait);
		}
		list
	}
}

struct Entry<K> {
	key: DisplayKey<K>,
	/// Number of nodes most recently realized for `key`.
	length: usize,
}

type Validity = Box<dyn Fn() -> bool + Send>;

struct PendingKeys<K> {
	keys: Vec<DisplayKey<K>>,
	valid: Validity,
}

struct EntryState<K> {
	entries: SlotMap<EntryId, Entry<K>>,
	order: Vec<EntryId>,
	index: FxHashMap<DisplayKey<K>, EntryId>,
	cache: NodeCache,
	active: bool,
}

impl<K: EntryKey> EntryState<K> {
	fn new() -> Self {
		Self {
			entries: SlotMap::with_key(),
			order: Vec::new(),
			index: FxHashMap::default(),
			cache: NodeCache::default(),
			active: false,
		}
	}

	/// Keys and lengths in display order.
	fn layout(&self) -> Vec<(DisplayKey<K>, usize)> {
		self.order
			.iter()
			.map(|id| {
				let entry = &self.entries[*id];
				(entry.key.clone(), entry.length)
			})
			.collect()
	}

	fn rebuild(&mut self) -> Snapshot {
		self.cache.rebuild(&self.order)
	}

	fn realized(&mut self) -> Snapshot {
		match self.cache.snapshot() {
			Some(snapshot) => snapshot,
			None => self.rebuild(),
		}
	}

	/// Drops entries and their slots, returning the nodes still alive.
	fn drop_entries(&mut self, ids: &FxHashSet<EntryId>) -> Vec<Node> {
		let mut live = Vec::new();
		for id in ids {
			live.extend(self.cache.remove(*id));
			if let Some(entry) = self.entries.remove(*id) {
				self.index.remove(&entry.key);
			}
		}
		self.order.retain(|id| !ids.contains(id));
		live
	}

	/// Creates entries for unseen keys and adopts the order of `keys`.
	///
	/// Existing entries take the latest key value. Returns the created entries.
	fn upsert(&mut self, keys: &[DisplayKey<K>]) -> FxHashSet<EntryId> {
		let mut fresh = FxHashSet::default();
		let mut order = Vec::with_capacity(keys.len());
		for key in keys {
			let id = match self.index.get(key) {
				Some(id) => {
					self.entries[*id].key = key.clone();
					*id
				}
				None => {
					let id = self.entries.insert(Entry {
						key: key.clone(),
						length: 0,
					});
					self.index.insert(key.clone(), id);
					fresh.insert(id);
					id
				}
			};
			order.push(id);
		}
		self.order = order;
		fresh
	}

	/// Replaces the entry list without realizing nodes or notifying anyone.
	fn reconcile(&mut self, keys: &[DisplayKey<K>]) -> Vec<Node> {
		let keep: FxHashSet<&DisplayKey<K>> = keys.iter().collect();
		let stale: FxHashSet<EntryId> = self.order.iter().copied().filter(|id| !keep.contains(&self.entries[*id].key)).collect();
		let dropped = self.drop_entries(&stale);
		self.upsert(keys);
		if !self.active {
			self.rebuild();
		}
		dropped
	}
}

/// Collapses duplicated keys.
///
/// When two keys compare equal, the entry stays at the position where the key
/// first appeared, and the value of the latest occurrence replaces the earlier
/// one. The result holds each key once, in first-seen order.
fn dedupe<K: EntryKey>(keys: Vec<DisplayKey<K>>) -> Vec<DisplayKey<K>> {
	let mut seen: FxHashMap<DisplayKey<K>, usize> = FxHashMap::default();
	let mut out: Vec<DisplayKey<K>> = Vec::with_capacity(keys.len());
	for key in keys {
		match seen.get(&key) {
			Some(pos) => {
				tracing::trace!(key = ?key, "entries.duplicate_key");
				out[*pos] = key;
			}
			None => {
				seen.insert(key.clone(), out.len());
				out.push(key);
			}
		}
	}
	out
}

#[track_caller]
fn fault(fault: ConsistencyFault) -> ! {
	tracing::error!(fault = %fault, "entries.consistency_fault");
	panic!("{fault}");
}

fn fire(owner: Option<&WeakNode>, event: NodeEvent) {
	if let Some(node) = owner.and_then(WeakNode::upgrade) {
		node.fire(&event);
	}
}

/// Entry list, node cache, and change notification of one tree position.
pub(crate) struct EntrySupport<K: EntryKey> {
	me: Weak<Self>,
	forest: Forest,
	populator: Arc<dyn Populator<K>>,
	owner: OnceLock<WeakNode>,
	state: Mutex<EntryState<K>>,
	pending: Mutex<Option<PendingKeys<K>>>,
}

impl<K: EntryKey> EntrySupport<K> {
	/// Builds the support together with the populator that feeds it.
	pub(crate) fn new(forest: Forest, populator: impl FnOnce(Weak<Self>) -> Arc<dyn Populator<K>>) -> Arc<Self> {
		Arc::new_cyclic(|me| Self {
			me: me.clone(),
			forest,
			populator: populator(me.clone()),
			owner: OnceLock::new(),
			state: Mutex::new(EntryState::new()),
			pending: Mutex::new(None),
		})
	}

	pub(crate) fn bind_owner(&self, owner: WeakNode) {
		if self.owner.set(owner).is_err() {
			tracing::warn!("entries.owner_already_bound");
		}
	}

	fn owner(&self) -> Option<&WeakNode> {
		self.owner.get()
	}

	pub(crate) fn is_active(&self) -> bool {
		self.state.lock().active
	}

	/// Number of committed keys, not counting the placeholder.
	pub(crate) fn key_count(&self) -> usize {
		let state = self.state.lock();
		state.order.iter().filter(|id| !matches!(state.entries[**id].key, DisplayKey::Wait)).count()
	}

	pub(crate) fn is_initialized(&self) -> bool {
		self.populator.is_initialized()
	}

	pub(crate) fn phase(&self) -> Option<PopulatorPhase> {
		self.populator.phase()
	}

	/// Requests `keys` as the new entry list.
	///
	/// The request is applied under write access: at once when the calling
	/// thread can take it, otherwise when its outermost read ends. A newer
	/// request replaces one still waiting. `valid` is checked on submission
	/// and again right before applying; a stale request is dropped.
	///
	/// The submission check runs under the pending slot's lock, so a request
	/// that was valid when checked cannot overwrite one stored after it went
	/// stale.
	pub(crate) fn set_keys(&self, keys: Vec<DisplayKey<K>>, valid: impl Fn() -> bool + Send + 'static) {
		{
			let mut pending = self.pending.lock();
			if !valid() {
				tracing::trace!("entries.set_keys.stale");
				return;
			}
			tracing::trace!(count = keys.len(), "entries.set_keys");
			*pending = Some(PendingKeys {
				keys,
				valid: Box::new(valid),
			});
		}
		let me = self.me.clone();
		self.forest.lock().post_write(move || {
			if let Some(support) = me.upgrade() {
				support.apply_pending();
			}
		});
	}

	fn apply_pending(&self) {
		let Some(pending) = self.pending.lock().take() else {
			tracing::trace!("entries.set_keys.superseded");
			return;
		};
		if !(pending.valid)() {
			tracing::trace!("entries.set_keys.stale");
			return;
		}
		self.commit(pending.keys);
	}

	fn commit(&self, keys: Vec<DisplayKey<K>>) {
		let keys = dedupe(keys);
		let owner = self.owner();
		{
			let mut state = self.state.lock();
			if !state.active || state.cache.retention() == Retention::Released {
				let dropped = state.reconcile(&keys);
				drop(state);
				tracing::trace!(count = keys.len(), dropped = dropped.len(), "entries.commit.quiet");
				self.discard(&dropped);
				return;
			}
		}
		self.commit_removals(&keys, owner);
		self.commit_reorder(&keys, owner);
		let fresh = self.state.lock().upsert(&keys);
		self.commit_additions(&fresh, owner);
	}

	fn commit_removals(&self, keys: &[DisplayKey<K>], owner: Option<&WeakNode>) {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let before = state.realized();
		let layout = state.layout();
		let keep: FxHashSet<&DisplayKey<K>> = keys.iter().collect();
		let (dropped, indices) = diff::removal(&layout, &keep);
		if dropped.is_empty() {
			return;
		}

		let ids: FxHashSet<EntryId> = dropped.iter().map(|pos| state.order[*pos]).collect();
		let mut removed = Vec::with_capacity(indices.len());
		for pos in &dropped {
			match state.cache.nodes_for(state.order[*pos], true) {
				Ok(nodes) => removed.extend(nodes.unwrap_or_default()),
				Err(error) => fault(error),
			}
		}
		state.drop_entries(&ids);
		let after = state.rebuild();
		drop(guard);

		let aligned = removed.len() == indices.len() && indices.iter().zip(&removed).all(|(i, node)| before.get(*i) == Some(node));
		if !aligned {
			fault(ConsistencyFault::DeltaMismatch {
				detail: "removed nodes do not sit at their removal indices".to_string(),
				previous: before.names(),
				current: after.names(),
				delta: indices,
			});
		}

		tracing::debug!(entries = dropped.len(), nodes = removed.len(), "entries.children_removed");
		if !removed.is_empty() {
			fire(
				owner,
				NodeEvent::ChildrenRemoved {
					removed: removed.clone(),
					indices,
					snapshot_before: before,
					snapshot_after: after,
				},
			);
		}
		self.discard(&removed);
	}

	fn commit_reorder(&self, keys: &[DisplayKey<K>], owner: Option<&WeakNode>) {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let survivors = state.layout();
		let new_order: Vec<&DisplayKey<K>> = keys.iter().filter(|key| state.index.contains_key(*key)).collect();
		let Some(permutation) = diff::permutation(&survivors, &new_order) else {
			return;
		};

		let before = state.realized();
		let order: Vec<EntryId> = new_order.iter().map(|key| state.index[*key]).collect();
		state.order = order;
		let after = state.rebuild();
		drop(guard);

		if diff::apply_permutation(&before[..], &permutation).as_deref() != Some(&after[..]) {
			fault(ConsistencyFault::DeltaMismatch {
				detail: "permutation does not reproduce the reordered nodes".to_string(),
				previous: before.names(),
				current: after.names(),
				delta: permutation,
			});
		}

		tracing::debug!(nodes = permutation.len(), "entries.children_reordered");
		fire(
			owner,
			NodeEvent::ChildrenReordered {
				permutation,
				snapshot_after: after,
			},
		);
	}

	/// Realizes the `fresh` entries and reports their nodes as added.
	fn commit_additions(&self, fresh: &FxHashSet<EntryId>, owner: Option<&WeakNode>) {
		if fresh.is_empty() {
			return;
		}
		let pending: Vec<(EntryId, DisplayKey<K>)> = {
			let state = self.state.lock();
			state
				.order
				.iter()
				.filter(|id| fresh.contains(*id))
				.map(|id| (*id, state.entries[*id].key.clone()))
				.collect()
		};
		let created: Vec<(EntryId, Vec<Node>)> = pending.into_iter().map(|(id, key)| (id, self.materialize(&key, owner))).collect();

		let mut guard = self.state.lock();
		let state = &mut *guard;
		for (id, nodes) in created {
			if let Some(entry) = state.entries.get_mut(id) {
				entry.length = nodes.len();
				state.cache.insert(id, nodes);
			}
		}
		let after = state.rebuild();
		let layout: Vec<(usize, bool)> = state.order.iter().map(|id| (state.entries[*id].length, fresh.contains(id))).collect();
		drop(guard);

		let indices = diff::insertion_indices(&layout);
		if indices.is_empty() {
			return;
		}
		let added: Vec<Node> = indices.iter().filter_map(|i| after.get(*i).cloned()).collect();
		if added.len() != indices.len() {
			fault(ConsistencyFault::DeltaMismatch {
				detail: "insertion indices exceed the realized nodes".to_string(),
				previous: Vec::new(),
				current: after.names(),
				delta: indices,
			});
		}

		tracing::debug!(entries = fresh.len(), nodes = added.len(), "entries.children_added");
		fire(
			owner,
			NodeEvent::ChildrenAdded {
				added,
				indices,
				snapshot_after: after,
			},
		);
	}

	/// Calls the factory for one position and adopts the produced nodes.
	fn materialize(&self, key: &DisplayKey<K>, owner: Option<&WeakNode>) -> Vec<Node> {
		let nodes = match key {
			DisplayKey::Key(key) => self.populator.create_nodes(key),
			DisplayKey::Wait => self.populator.wait_node().into_iter().collect(),
		};
		let Some(owner) = owner else {
			return nodes;
		};
		nodes
			.into_iter()
			.filter(|node| {
				let adopted = node.assign_parent(owner);
				if !adopted {
					tracing::warn!(node = node.name(), "entries.node_owned_elsewhere");
				}
				adopted
			})
			.collect()
	}

	/// Detaches dropped nodes and hands the real ones to the factory.
	fn discard(&self, nodes: &[Node]) {
		if nodes.is_empty() {
			return;
		}
		if let Some(owner) = self.owner() {
			for node in nodes {
				node.clear_parent(owner);
			}
		}
		let real: Vec<Node> = nodes.iter().filter(|node| !node.is_placeholder()).cloned().collect();
		if !real.is_empty() {
			self.populator.destroy_nodes(&real);
		}
	}

	/// Activates the position if needed, then returns its nodes.
	///
	/// With `optimal`, first waits for a running background enumeration,
	/// unless the caller holds tree access the enumeration would need.
	pub(crate) fn nodes(&self, optimal: bool) -> Snapshot {
		self.ensure_active();
		let lock = self.forest.lock();
		if optimal {
			if lock.is_read_access() {
				tracing::trace!("entries.nodes.optimal_under_lock");
			} else {
				self.populator.await_quiescent(self.forest.config().optimal_wait_timeout());
			}
		}
		lock.read(|| self.current())
	}

	/// Returns the realized nodes without activating or taking the tree lock.
	pub(crate) fn snapshot(&self) -> Snapshot {
		self.state.lock().cache.snapshot().unwrap_or_default()
	}

	fn ensure_active(&self) {
		if self.is_active() {
			return;
		}
		let lock = self.forest.lock();
		if lock.is_write_access() || !lock.is_read_access() {
			lock.write(|| self.activate());
		} else {
			tracing::trace!("entries.activate.posted");
			let me = self.me.clone();
			lock.post_write(move || {
				if let Some(support) = me.upgrade() {
					support.activate();
				}
			});
		}
	}

	fn activate(&self) {
		let (fresh, stale) = {
			let mut state = self.state.lock();
			if state.active {
				return;
			}
			state.active = true;
			state.cache.hold();
			let stale = state.cache.reset();
			let fresh: FxHashSet<EntryId> = state.order.iter().copied().collect();
			(fresh, stale)
		};
		tracing::debug!(entries = fresh.len(), "entries.activate");
		if let Some(owner) = self.owner() {
			for node in &stale {
				node.clear_parent(owner);
			}
		}
		self.commit_additions(&fresh, self.owner());
		self.populator.activate();
	}

	/// Stops using the position: clears it and lets the populator release the factory.
	pub(crate) fn deactivate(&self) {
		let me = self.me.clone();
		self.forest.lock().post_write(move || {
			if let Some(support) = me.upgrade() {
				support.deactivate_now();
			}
		});
	}

	fn deactivate_now(&self) {
		if !self.is_active() {
			return;
		}
		tracing::debug!("entries.deactivate");
		self.populator.deactivate();
		self.state.lock().active = false;
	}

	/// Realized nodes, recomputing the ones reclaimed since a release.
	fn current(&self) -> Snapshot {
		let owner = self.owner();
		let missing: Vec<(EntryId, DisplayKey<K>)> = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			if let Some(snapshot) = state.cache.snapshot() {
				return snapshot;
			}
			if !state.active {
				return Snapshot::empty();
			}
			state.cache.hold();
			let mut missing = Vec::new();
			for id in &state.order {
				if !matches!(state.cache.nodes_for(*id, false), Ok(Some(_))) {
					missing.push((*id, state.entries[*id].key.clone()));
				}
			}
			missing
		};

		tracing::debug!(entries = missing.len(), "entries.rematerialize");
		let created: Vec<(EntryId, Vec<Node>)> = missing.into_iter().map(|(id, key)| (id, self.materialize(&key, owner))).collect();

		let mut guard = self.state.lock();
		let state = &mut *guard;
		if let Some(snapshot) = state.cache.snapshot() {
			drop(guard);
			if let Some(owner) = owner {
				for (_, nodes) in &created {
					for node in nodes {
						node.clear_parent(owner);
					}
				}
			}
			return snapshot;
		}
		for (id, nodes) in created {
			if let Some(entry) = state.entries.get_mut(id) {
				entry.length = nodes.len();
				state.cache.insert(id, nodes);
			}
		}
		state.rebuild()
	}

	/// Drops the realized array; nodes stay reachable only through outside references.
	pub(crate) fn release(&self) {
		let me = self.me.clone();
		self.forest.lock().post_write(move || {
			if let Some(support) = me.upgrade() {
				support.state.lock().cache.clear();
				tracing::debug!("entries.release");
			}
		});
	}

	/// Evicts reclaimed cache slots. Returns the number evicted.
	///
	/// A released position whose nodes are all gone is deactivated.
	pub(crate) fn sweep(&self) -> usize {
		let (evicted, idle) = self.forest.lock().read(|| {
			let mut state = self.state.lock();
			let evicted = state.cache.sweep();
			let idle = state.active && state.cache.retention() == Retention::Released && state.cache.is_vacant();
			(evicted, idle)
		});
		tracing::debug!(evicted, idle, "cache.sweep");
		if idle {
			self.deactivate();
		}
		evicted
	}

	/// Recreates the nodes of the entry for `key`, leaving every other entry alone.
	pub(crate) fn refresh_entry(&self, key: &K) {
		let me = self.me.clone();
		let key = DisplayKey::Key(key.clone());
		self.forest.lock().post_write(move || {
			if let Some(support) = me.upgrade() {
				support.apply_refresh(&key);
			}
		});
	}

	fn apply_refresh(&self, key: &DisplayKey<K>) {
		let owner = self.owner();
		let (id, old) = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			let Some(id) = state.index.get(key).copied() else {
				tracing::trace!(key = ?key, "entries.refresh_entry.unknown");
				return;
			};
			if !state.active || state.cache.retention() == Retention::Released {
				state.cache.remove(id);
				state.entries[id].length = 0;
				return;
			}
			match state.cache.nodes_for(id, true) {
				Ok(nodes) => (id, nodes.unwrap_or_default()),
				Err(error) => fault(error),
			}
		};

		let new = self.materialize(key, owner);
		let kept: Vec<Node> = old.iter().filter(|node| new.contains(node)).cloned().collect();
		let removed: Vec<Node> = old.iter().filter(|node| !new.contains(node)).cloned().collect();

		let mut guard = self.state.lock();
		let state = &mut *guard;
		let offset: usize = state.order.iter().take_while(|other| **other != id).map(|other| state.entries[*other].length).sum();
		let before = state.realized();
		let removed_indices: Vec<usize> = old.iter().enumerate().filter(|(_, node)| !new.contains(node)).map(|(i, _)| offset + i).collect();
		state.entries[id].length = kept.len();
		state.cache.insert(id, kept.clone());
		let mid = state.rebuild();
		drop(guard);

		tracing::debug!(key = ?key, removed = removed.len(), "entries.refresh_entry");
		if !removed.is_empty() {
			fire(
				owner,
				NodeEvent::ChildrenRemoved {
					removed: removed.clone(),
					indices: removed_indices,
					snapshot_before: before,
					snapshot_after: mid,
				},
			);
			self.discard(&removed);
		}

		let reordered: Vec<Node> = new.iter().filter(|node| old.contains(node)).cloned().collect();
		if reordered != kept {
			self.reorder_within(id, offset, &kept, reordered, owner);
		}

		let mut guard = self.state.lock();
		let state = &mut *guard;
		let added_indices: Vec<usize> = new.iter().enumerate().filter(|(_, node)| !old.contains(node)).map(|(i, _)| offset + i).collect();
		let added: Vec<Node> = new.iter().filter(|node| !old.contains(node)).cloned().collect();
		if let Some(entry) = state.entries.get_mut(id) {
			entry.length = new.len();
		}
		state.cache.insert(id, new);
		let after = state.rebuild();
		drop(guard);

		if !added.is_empty() {
			fire(
				owner,
				NodeEvent::ChildrenAdded {
					added,
					indices: added_indices,
					snapshot_after: after,
				},
			);
		}
	}

	/// Moves the surviving nodes of one entry from `kept` order to `reordered` order.
	fn reorder_within(&self, id: EntryId, offset: usize, kept: &[Node], reordered: Vec<Node>, owner: Option<&WeakNode>) {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let before = state.realized();
		let mut permutation: Vec<usize> = (0..before.len()).collect();
		for (i, node) in kept.iter().enumerate() {
			if let Some(target) = reordered.iter().position(|other| other == node) {
				permutation[offset + i] = offset + target;
			}
		}
		state.cache.insert(id, reordered);
		let after = state.rebuild();
		drop(guard);

		if diff::apply_permutation(&before[..], &permutation).as_deref() != Some(&after[..]) {
			fault(ConsistencyFault::DeltaMismatch {
				detail: "refreshed entry permutation does not reproduce its nodes".to_string(),
				previous: before.names(),
				current: after.names(),
				delta: permutation,
			});
		}

		tracing::debug!(nodes = kept.len(), "entries.refresh_entry.reordered");
		fire(
			owner,
			NodeEvent::ChildrenReordered {
				permutation,
				snapshot_after: after,
			},
		);
	}
}

impl<K: EntryKey> RefreshTarget<K> for EntrySupport<K> {
	fn refresh(&self, immediate: bool) {
		self.populator.refresh(immediate);
	}

	fn refresh_key(&self, key: &K) {
		self.refresh_entry(key);
	}
}
