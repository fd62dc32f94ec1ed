//! The child container owned by every node.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::entries::{EntryKey, EntrySupport};
use crate::error::{NodesError, Result};
use crate::factory::{KeyFactory, RefreshTarget};
use crate::forest::Forest;
use crate::node::{Node, WeakNode};
use crate::populator::{AsyncPopulator, Populator, PopulatorPhase, SyncPopulator};
use crate::snapshot::Snapshot;

/// Type-erased view of an entry support.
trait ChildrenSource: Send + Sync {
	fn nodes(&self, optimal: bool) -> Snapshot;
	fn snapshot(&self) -> Snapshot;
	fn is_active(&self) -> bool;
	fn is_initialized(&self) -> bool;
	fn phase(&self) -> Option<PopulatorPhase>;
	fn release(&self);
	fn sweep(&self) -> usize;
	fn deactivate(&self);
	fn bind_owner(&self, owner: WeakNode);
}

impl<K: EntryKey> ChildrenSource for EntrySupport<K> {
	fn nodes(&self, optimal: bool) -> Snapshot {
		EntrySupport::nodes(self, optimal)
	}

	fn snapshot(&self) -> Snapshot {
		EntrySupport::snapshot(self)
	}

	fn is_active(&self) -> bool {
		EntrySupport::is_active(self)
	}

	fn is_initialized(&self) -> bool {
		EntrySupport::is_initialized(self)
	}

	fn phase(&self) -> Option<PopulatorPhase> {
		EntrySupport::phase(self)
	}

	fn release(&self) {
		EntrySupport::release(self);
	}

	fn sweep(&self) -> usize {
		EntrySupport::sweep(self)
	}

	fn deactivate(&self) {
		EntrySupport::deactivate(self);
	}

	fn bind_owner(&self, owner: WeakNode) {
		EntrySupport::bind_owner(self, owner);
	}
}

type LazyInit = Box<dyn FnOnce() -> Children + Send>;

struct LazyChildren {
	init: Mutex<Option<LazyInit>>,
	real: OnceLock<Children>,
	owner: OnceLock<WeakNode>,
}

impl LazyChildren {
	fn real(&self) -> &Children {
		self.real.get_or_init(|| {
			let children = match self.init.lock().take() {
				Some(init) => init(),
				None => Children::leaf(),
			};
			tracing::trace!(leaf = children.is_leaf(), "children.lazy.realize");
			if let Some(owner) = self.owner.get() {
				children.bind_owner(owner.clone());
			}
			children
		})
	}
}

enum Repr {
	Leaf,
	Keyed(Arc<dyn ChildrenSource>),
	Lazy(Box<LazyChildren>),
}

/// Children of one node: none, or a keyed list fed by a [`KeyFactory`] or
/// maintained through [`crate::KeyedChildren`].
pub struct Children {
	repr: Repr,
}

impl fmt::Debug for Children {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.repr {
			Repr::Leaf => f.write_str("Children::Leaf"),
			Repr::Keyed(source) => f
				.debug_struct("Children::Keyed")
				.field("active", &source.is_active())
				.field("snapshot", &source.snapshot())
				.finish(),
			Repr::Lazy(lazy) => match lazy.real.get() {
				Some(real) => f.debug_tuple("Children::Lazy").field(real).finish(),
				None => f.write_str("Children::Lazy(<pending>)"),
			},
		}
	}
}

impl Children {
	/// Children of a node that never has any.
	pub fn leaf() -> Self {
		Self { repr: Repr::Leaf }
	}

	/// Children computed by `factory`.
	///
	/// With `asynchronous`, keys are enumerated on the forest's worker pool
	/// and the factory's wait node is shown meanwhile; otherwise they are
	/// enumerated on the thread that first asks for the nodes.
	///
	/// Fails if `factory` already feeds another live children object.
	pub fn create<F: KeyFactory>(forest: &Forest, factory: Arc<F>, asynchronous: bool) -> Result<Self> {
		if factory.link().is_attached() {
			return Err(NodesError::FactoryAlreadyAttached);
		}
		let support = EntrySupport::<F::Key>::new(forest.clone(), |support| -> Arc<dyn Populator<F::Key>> {
			if asynchronous {
				AsyncPopulator::new(factory.clone(), support, forest.clone())
			} else {
				Arc::new(SyncPopulator::new(factory.clone(), support))
			}
		});
		let weak = Arc::downgrade(&support);
		let target: Weak<dyn RefreshTarget<F::Key>> = weak;
		factory.link().attach(target)?;
		tracing::debug!(asynchronous, "children.create");
		Ok(Self::keyed(support))
	}

	pub(crate) fn keyed<K: EntryKey>(support: Arc<EntrySupport<K>>) -> Self {
		Self {
			repr: Repr::Keyed(support),
		}
	}

	/// Children built by `init` the first time they are used.
	pub fn lazy(init: impl FnOnce() -> Children + Send + 'static) -> Self {
		Self {
			repr: Repr::Lazy(Box::new(LazyChildren {
				init: Mutex::new(Some(Box::new(init))),
				real: OnceLock::new(),
				owner: OnceLock::new(),
			})),
		}
	}

	fn source(&self) -> Option<&dyn ChildrenSource> {
		match &self.repr {
			Repr::Leaf => None,
			Repr::Keyed(source) => Some(source.as_ref()),
			Repr::Lazy(lazy) => lazy.real().source(),
		}
	}

	/// Returns true for children that can never have nodes.
	///
	/// Lazy children count as leaves only once built.
	pub fn is_leaf(&self) -> bool {
		match &self.repr {
			Repr::Leaf => true,
			Repr::Keyed(_) => false,
			Repr::Lazy(lazy) => lazy.real.get().is_some_and(Children::is_leaf),
		}
	}

	/// Returns the current nodes, activating the children first if needed.
	///
	/// With `optimal`, waits until a running background enumeration finishes
	/// unless the calling thread holds tree access or is a pool worker. The
	/// wait is capped by `optimal_wait_timeout_ms` when configured.
	pub fn nodes(&self, optimal: bool) -> Snapshot {
		self.source().map(|source| source.nodes(optimal)).unwrap_or_default()
	}

	pub fn node_count(&self, optimal: bool) -> usize {
		self.nodes(optimal).len()
	}

	/// Returns the node at `index`, or `None` past the end.
	pub fn node_at(&self, index: usize) -> Option<Node> {
		self.nodes(false).get(index).cloned()
	}

	/// Returns the first node called `name`, or the first node when `name` is `None`.
	///
	/// Falls back to waiting for the full list when the current one has no match.
	pub fn find_child(&self, name: Option<&str>) -> Option<Node> {
		let search = |nodes: &Snapshot| match name {
			None => nodes.first().cloned(),
			Some(name) => nodes.iter().find(|node| node.name() == name).cloned(),
		};
		search(&self.nodes(false)).or_else(|| if self.is_initialized() { None } else { search(&self.nodes(true)) })
	}

	/// Returns the nodes realized so far without activating or locking.
	pub fn snapshot(&self) -> Snapshot {
		match &self.repr {
			Repr::Lazy(lazy) if lazy.real.get().is_none() => Snapshot::empty(),
			_ => self.source().map(|source| source.snapshot()).unwrap_or_default(),
		}
	}

	pub fn is_active(&self) -> bool {
		match &self.repr {
			Repr::Lazy(lazy) if lazy.real.get().is_none() => false,
			_ => self.source().is_some_and(|source| source.is_active()),
		}
	}

	/// Returns true once the complete key list was committed.
	///
	/// Leaves are always initialized.
	pub fn is_initialized(&self) -> bool {
		match &self.repr {
			Repr::Lazy(lazy) if lazy.real.get().is_none() => false,
			_ => self.source().is_none_or(|source| source.is_initialized()),
		}
	}

	/// Phase of the background enumeration, for asynchronous children.
	pub fn phase(&self) -> Option<PopulatorPhase> {
		match &self.repr {
			Repr::Lazy(lazy) if lazy.real.get().is_none() => None,
			_ => self.source().and_then(|source| source.phase()),
		}
	}

	/// Drops the realized node array, e.g. when the owner is collapsed.
	///
	/// Entries survive; nodes no longer referenced elsewhere become
	/// reclaimable by [`Self::sweep`] and are recreated on the next access.
	pub fn release(&self) {
		if let Some(source) = self.built_source() {
			source.release();
		}
	}

	/// Evicts reclaimed nodes. Returns the number of entries evicted.
	///
	/// Released children whose nodes are all gone are deactivated, so the
	/// next access enumerates the keys from scratch.
	pub fn sweep(&self) -> usize {
		self.built_source().map_or(0, |source| source.sweep())
	}

	/// Stops using the children: cancels background work, clears the nodes,
	/// and releases the factory.
	pub fn deactivate(&self) {
		if let Some(source) = self.built_source() {
			source.deactivate();
		}
	}

	/// Source without forcing lazy children into existence.
	fn built_source(&self) -> Option<&dyn ChildrenSource> {
		match &self.repr {
			Repr::Lazy(lazy) => lazy.real.get().and_then(Children::source),
			_ => self.source(),
		}
	}

	pub(crate) fn bind_owner(&self, owner: WeakNode) {
		match &self.repr {
			Repr::Leaf => {}
			Repr::Keyed(source) => source.bind_owner(owner),
			Repr::Lazy(lazy) => match lazy.real.get() {
				Some(real) => real.bind_owner(owner),
				None => {
					let _ = lazy.owner.set(owner);
				}
			},
		}
	}
}
