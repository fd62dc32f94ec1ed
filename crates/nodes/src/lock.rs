//! Reader/writer mutex serializing every structural mutation of a forest.
//!
//! Writers exclude each other and all readers. Both modes nest on the owning
//! thread, and a writer may also read. A reader cannot become a writer;
//! mutations requested while reading go through [`TreeLock::post_write`] and
//! run as soon as that thread leaves its outermost read section.

use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

type PostedWrite = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LockState {
	readers: FxHashMap<ThreadId, usize>,
	writer: Option<ThreadId>,
	write_depth: usize,
	waiting_writers: usize,
	posted: FxHashMap<ThreadId, Vec<PostedWrite>>,
}

/// Forest-wide structural lock.
#[derive(Default)]
pub struct TreeLock {
	state: Mutex<LockState>,
	changed: Condvar,
}

impl std::fmt::Debug for TreeLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("TreeLock")
			.field("readers", &state.readers.len())
			.field("writer", &state.writer)
			.field("write_depth", &state.write_depth)
			.field("waiting_writers", &state.waiting_writers)
			.finish()
	}
}

struct ReadGuard<'a> {
	lock: &'a TreeLock,
}

impl Drop for ReadGuard<'_> {
	fn drop(&mut self) {
		self.lock.exit_read();
	}
}

struct WriteGuard<'a> {
	lock: &'a TreeLock,
}

impl Drop for WriteGuard<'_> {
	fn drop(&mut self) {
		self.lock.exit_write();
	}
}

impl TreeLock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `f` with shared access.
	pub fn read<R>(&self, f: impl FnOnce() -> R) -> R {
		let outermost = self.enter_read();
		let result = {
			let _guard = ReadGuard { lock: self };
			f()
		};
		if outermost {
			self.flush_posted();
		}
		result
	}

	/// Runs `f` with exclusive access.
	///
	/// # Panics
	///
	/// Panics if the calling thread holds read access without write access;
	/// waiting for the other readers to leave would never finish.
	pub fn write<R>(&self, f: impl FnOnce() -> R) -> R {
		self.enter_write();
		let _guard = WriteGuard { lock: self };
		f()
	}

	/// Runs `f` under write access as soon as the calling thread can get it.
	///
	/// Runs immediately when the caller already writes or holds no access;
	/// deferred to the end of the caller's outermost read section otherwise.
	pub fn post_write(&self, f: impl FnOnce() + Send + 'static) {
		let me = std::thread::current().id();
		{
			let mut state = self.state.lock();
			if state.writer != Some(me) && state.readers.contains_key(&me) {
				state.posted.entry(me).or_default().push(Box::new(f));
				tracing::trace!("lock.post_write.deferred");
				return;
			}
		}
		self.write(f);
	}

	/// Returns true when the calling thread holds read or write access.
	pub fn is_read_access(&self) -> bool {
		let me = std::thread::current().id();
		let state = self.state.lock();
		state.writer == Some(me) || state.readers.contains_key(&me)
	}

	/// Returns true when the calling thread holds write access.
	pub fn is_write_access(&self) -> bool {
		self.state.lock().writer == Some(std::thread::current().id())
	}

	fn enter_read(&self) -> bool {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		let nested = state.writer == Some(me) || state.readers.contains_key(&me);
		if !nested {
			while state.writer.is_some() || state.waiting_writers > 0 {
				self.changed.wait(&mut state);
			}
		}
		*state.readers.entry(me).or_default() += 1;
		!nested
	}

	fn exit_read(&self) {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		let Some(depth) = state.readers.get_mut(&me) else {
			return;
		};
		*depth -= 1;
		if *depth == 0 {
			state.readers.remove(&me);
			if std::thread::panicking() && state.writer != Some(me) {
				state.posted.remove(&me);
			}
			self.changed.notify_all();
		}
	}

	fn enter_write(&self) {
		let me = std::thread::current().id();
		let mut state = self.state.lock();
		if state.writer == Some(me) {
			state.write_depth += 1;
			return;
		}
		assert!(
			!state.readers.contains_key(&me),
			"cannot acquire tree write access while holding read access; use post_write"
		);
		state.waiting_writers += 1;
		while state.writer.is_some() || !state.readers.is_empty() {
			self.changed.wait(&mut state);
		}
		state.waiting_writers -= 1;
		state.writer = Some(me);
		state.write_depth = 1;
	}

	fn exit_write(&self) {
		let mut state = self.state.lock();
		state.write_depth -= 1;
		if state.write_depth == 0 {
			state.writer = None;
			self.changed.notify_all();
		}
	}

	fn flush_posted(&self) {
		let me = std::thread::current().id();
		loop {
			let batch = self.state.lock().posted.remove(&me).unwrap_or_default();
			if batch.is_empty() {
				return;
			}
			tracing::trace!(count = batch.len(), "lock.post_write.flush");
			for write in batch {
				self.write(write);
			}
		}
	}
}
