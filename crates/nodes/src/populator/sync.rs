use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Populator, PopulatorPhase};
use crate::entries::{DisplayKey, EntrySupport};
use crate::factory::{self, KeyFactory, KeySink, KeysProgress};
use crate::node::Node;

/// Runs the factory on the calling thread whenever keys are needed.
pub(crate) struct SyncPopulator<F: KeyFactory> {
	factory: Arc<F>,
	support: Weak<EntrySupport<F::Key>>,
	active: AtomicBool,
	initialized: AtomicBool,
	notified: Mutex<bool>,
}

impl<F: KeyFactory> SyncPopulator<F> {
	pub(crate) fn new(factory: Arc<F>, support: Weak<EntrySupport<F::Key>>) -> Self {
		Self {
			factory,
			support,
			active: AtomicBool::new(false),
			initialized: AtomicBool::new(false),
			notified: Mutex::new(false),
		}
	}

	fn populate(&self) {
		let mut keys = Vec::new();
		loop {
			let mut sink = KeySink::new(&mut keys, None, None);
			match self.factory.create_keys(&mut sink) {
				Ok(KeysProgress::Complete) => break,
				Ok(KeysProgress::Partial) => continue,
				Err(_) => {
					tracing::warn!("populator.sync.cancelled_without_token");
					return;
				}
			}
		}
		tracing::trace!(count = keys.len(), "populator.sync.keys");
		if let Some(support) = self.support.upgrade() {
			support.set_keys(DisplayKey::list(&keys, false), || true);
		}
		self.initialized.store(true, Ordering::Release);
	}
}

impl<F: KeyFactory> Populator<F::Key> for SyncPopulator<F> {
	fn activate(&self) {
		self.active.store(true, Ordering::Release);
		{
			let mut notified = self.notified.lock();
			if !*notified {
				*notified = true;
				self.factory.add_notify();
			}
		}
		self.populate();
	}

	fn deactivate(&self) {
		self.active.store(false, Ordering::Release);
		self.initialized.store(false, Ordering::Release);
		if let Some(support) = self.support.upgrade() {
			support.set_keys(Vec::new(), || true);
		}
		let mut notified = self.notified.lock();
		if *notified {
			*notified = false;
			self.factory.remove_notify();
		}
	}

	fn refresh(&self, _immediate: bool) {
		if self.active.load(Ordering::Acquire) {
			self.populate();
		}
	}

	fn await_quiescent(&self, _timeout: Option<Duration>) {}

	fn create_nodes(&self, key: &F::Key) -> Vec<Node> {
		factory::realize(&*self.factory, key)
	}

	fn wait_node(&self) -> Option<Node> {
		None
	}

	fn destroy_nodes(&self, nodes: &[Node]) {
		self.factory.destroy_nodes(nodes);
	}

	fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	fn phase(&self) -> Option<PopulatorPhase> {
		None
	}
}
