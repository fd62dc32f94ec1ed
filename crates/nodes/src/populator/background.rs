use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arbor_worker::{GenerationToken, TaskClass, TaskHandle};
use parking_lot::Mutex;

use super::{Populator, PopulatorPhase};
use crate::entries::{DisplayKey, EntrySupport};
use crate::error::Cancelled;
use crate::factory::{self, KeyFactory, KeySink, KeysProgress};
use crate::forest::Forest;
use crate::node::Node;

struct RunState {
	phase: PopulatorPhase,
	/// Generation of the most recent run; commits from older runs are dropped.
	generation: u64,
	token: Option<GenerationToken>,
	task: Option<TaskHandle>,
}

/// Enumerates keys on the forest's worker pool.
///
/// While the enumeration runs, the keys found so far are committed followed
/// by the factory's placeholder, so children appear as they are discovered.
pub(crate) struct AsyncPopulator<F: KeyFactory> {
	me: Weak<Self>,
	factory: Arc<F>,
	support: Weak<EntrySupport<F::Key>>,
	forest: Forest,
	run: Mutex<RunState>,
	/// Whether `add_notify` was delivered without a matching `remove_notify`.
	notified: Mutex<bool>,
	initialized: AtomicBool,
	wait_node: Mutex<Option<Node>>,
}

impl<F: KeyFactory> AsyncPopulator<F> {
	pub(crate) fn new(factory: Arc<F>, support: Weak<EntrySupport<F::Key>>, forest: Forest) -> Arc<Self> {
		Arc::new_cyclic(|me| Self {
			me: me.clone(),
			factory,
			support,
			forest,
			run: Mutex::new(RunState {
				phase: PopulatorPhase::Idle,
				generation: 0,
				token: None,
				task: None,
			}),
			notified: Mutex::new(false),
			initialized: AtomicBool::new(false),
			wait_node: Mutex::new(None),
		})
	}

	/// Starts a new generation, cancelling whatever run was current.
	fn next_generation(&self, run: &mut RunState, phase: PopulatorPhase) -> GenerationToken {
		if let Some(previous) = run.token.take() {
			previous.cancel();
		}
		let token = GenerationToken::fresh(self.forest.pool().clock().next());
		run.generation = token.generation();
		run.token = Some(token.clone());
		run.task = None;
		run.phase = phase;
		token
	}

	fn schedule(&self, class: TaskClass) {
		let pool = self.forest.pool();
		let mut run = self.run.lock();
		let token = self.next_generation(&mut run, PopulatorPhase::Scheduled);
		tracing::debug!(worker_class = ?class, generation = token.generation(), "populator.schedule");
		let me = self.me.clone();
		run.task = Some(pool.submit_with(class, token, move |token| {
			if let Some(populator) = me.upgrade() {
				populator.run_loop(token);
			}
		}));
	}

	fn is_current(&self, token: &GenerationToken) -> bool {
		!token.is_cancelled() && self.run.lock().generation == token.generation()
	}

	fn run_loop(&self, token: &GenerationToken) {
		{
			let mut run = self.run.lock();
			if token.is_cancelled() || run.generation != token.generation() {
				return;
			}
			run.phase = PopulatorPhase::Running;
		}
		if !self.notify_added(token) {
			return;
		}
		tracing::debug!(generation = token.generation(), "populator.run");
		match self.enumerate(token, true) {
			Ok(keys) => {
				tracing::debug!(generation = token.generation(), count = keys.len(), "populator.complete");
				self.commit(token, &keys, false);
				self.finish(token);
			}
			Err(Cancelled) => tracing::debug!(generation = token.generation(), "populator.cancelled"),
		}
	}

	/// Delivers `add_notify` once, unless `token` was cancelled first.
	///
	/// Shares the `notified` lock with deactivation, so a run that loses the
	/// race never notifies a factory that was already released.
	fn notify_added(&self, token: &GenerationToken) -> bool {
		let mut notified = self.notified.lock();
		if token.is_cancelled() {
			return false;
		}
		if !*notified {
			*notified = true;
			tracing::debug!("populator.add_notify");
			self.factory.add_notify();
		}
		true
	}

	/// Calls `create_keys` until the factory reports completion.
	///
	/// With `reveal`, the key list is committed right away, followed by the
	/// placeholder, whenever it outgrows what is already shown.
	fn enumerate(&self, token: &GenerationToken, reveal: bool) -> Result<Vec<F::Key>, Cancelled> {
		let wait = reveal && self.cached_wait_node().is_some();
		let mut keys = Vec::new();
		let mut revealed = match self.support.upgrade() {
			Some(support) if reveal => support.key_count(),
			_ => 0,
		};
		loop {
			let progress = if reveal {
				let mut on_append = |so_far: &[F::Key]| {
					if so_far.len() > revealed {
						revealed = so_far.len();
						self.commit(token, so_far, wait);
					}
				};
				let mut sink = KeySink::new(&mut keys, Some(token), Some(&mut on_append));
				self.factory.create_keys(&mut sink)
			} else {
				let mut sink = KeySink::new(&mut keys, Some(token), None);
				self.factory.create_keys(&mut sink)
			};
			match progress? {
				KeysProgress::Complete => return Ok(keys),
				KeysProgress::Partial => {
					if token.is_cancelled() {
						return Err(Cancelled);
					}
					tracing::trace!(generation = token.generation(), count = keys.len(), "populator.partial");
					if reveal && keys.len() > revealed {
						revealed = keys.len();
						self.commit(token, &keys, wait);
					}
				}
			}
		}
	}

	fn commit(&self, token: &GenerationToken, keys: &[F::Key], wait: bool) {
		let Some(support) = self.support.upgrade() else {
			token.cancel();
			return;
		};
		let me = self.me.clone();
		let token = token.clone();
		support.set_keys(DisplayKey::list(keys, wait), move || me.upgrade().is_some_and(|populator| populator.is_current(&token)));
	}

	fn finish(&self, token: &GenerationToken) {
		let mut run = self.run.lock();
		if !token.is_cancelled() && run.generation == token.generation() {
			run.phase = PopulatorPhase::Completed;
			self.initialized.store(true, Ordering::Release);
		}
	}

	/// Recomputes on the calling thread and commits once.
	fn refresh_now(&self) {
		let token = self.next_generation(&mut self.run.lock(), PopulatorPhase::Running);
		tracing::debug!(generation = token.generation(), "populator.refresh.immediate");
		if !self.notify_added(&token) {
			return;
		}
		match self.enumerate(&token, false) {
			Ok(keys) => {
				self.commit(&token, &keys, false);
				self.finish(&token);
			}
			Err(Cancelled) => tracing::debug!(generation = token.generation(), "populator.cancelled"),
		}
	}

	fn cached_wait_node(&self) -> Option<Node> {
		let mut slot = self.wait_node.lock();
		if slot.is_none() {
			*slot = factory::wait_node(&*self.factory);
		}
		slot.clone()
	}
}

impl<F: KeyFactory> Populator<F::Key> for AsyncPopulator<F> {
	fn activate(&self) {
		if self.initialized.load(Ordering::Acquire) {
			return;
		}
		if matches!(self.run.lock().phase, PopulatorPhase::Scheduled | PopulatorPhase::Running) {
			return;
		}
		if self.cached_wait_node().is_some()
			&& let Some(support) = self.support.upgrade()
		{
			support.set_keys(vec![DisplayKey::Wait], || true);
		}
		self.schedule(TaskClass::Populate);
	}

	fn deactivate(&self) {
		{
			let mut run = self.run.lock();
			if let Some(token) = run.token.take() {
				token.cancel();
			}
			run.phase = match run.phase {
				PopulatorPhase::Scheduled | PopulatorPhase::Running => PopulatorPhase::Cancelled,
				_ => PopulatorPhase::Idle,
			};
			tracing::debug!(generation = run.generation, phase = ?run.phase, "populator.deactivate");
		}
		self.initialized.store(false, Ordering::Release);
		if let Some(support) = self.support.upgrade() {
			support.set_keys(Vec::new(), || true);
		}
		let mut notified = self.notified.lock();
		if *notified {
			*notified = false;
			tracing::debug!("populator.remove_notify");
			self.factory.remove_notify();
		}
	}

	fn refresh(&self, immediate: bool) {
		if !self.support.upgrade().is_some_and(|support| support.is_active()) {
			tracing::trace!("populator.refresh.inactive");
			return;
		}
		if immediate && !self.forest.is_dispatch_thread() {
			self.refresh_now();
		} else {
			if immediate {
				tracing::debug!("populator.refresh.downgraded");
			}
			self.schedule(TaskClass::Refresh);
		}
	}

	fn await_quiescent(&self, timeout: Option<Duration>) {
		let deadline = timeout.map(|timeout| Instant::now() + timeout);
		loop {
			let task = {
				let run = self.run.lock();
				match (&run.task, run.phase) {
					(Some(task), PopulatorPhase::Scheduled | PopulatorPhase::Running) if !task.is_finished() => task.clone(),
					_ => return,
				}
			};
			if task.is_current_thread() || self.forest.pool().is_worker_thread() {
				tracing::trace!(generation = task.generation(), "populator.await_quiescent.on_worker");
				return;
			}
			tracing::trace!(generation = task.generation(), "populator.await_quiescent");
			match deadline {
				None => {
					task.join();
				}
				Some(deadline) => {
					let remaining = deadline.saturating_duration_since(Instant::now());
					if task.join_timeout(remaining).is_none() {
						tracing::debug!(generation = task.generation(), "populator.await_quiescent.timeout");
						return;
					}
				}
			}
		}
	}

	fn create_nodes(&self, key: &F::Key) -> Vec<Node> {
		factory::realize(&*self.factory, key)
	}

	fn wait_node(&self) -> Option<Node> {
		self.cached_wait_node()
	}

	fn destroy_nodes(&self, nodes: &[Node]) {
		self.factory.destroy_nodes(nodes);
	}

	fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	fn phase(&self) -> Option<PopulatorPhase> {
		Some(self.run.lock().phase)
	}
}

impl<F: KeyFactory> Drop for AsyncPopulator<F> {
	fn drop(&mut self) {
		if let Some(token) = self.run.get_mut().token.take() {
			token.cancel();
		}
	}
}
