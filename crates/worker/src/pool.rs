use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::task::{TaskExit, panic_message};
use crate::{GenerationClock, GenerationToken, TaskClass, TaskHandle, WorkerError};

thread_local! {
	/// Address of the pool whose task the current thread is executing, or 0.
	static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Bounded pool of blocking worker threads.
///
/// At most `threads` submitted closures run at once; the rest wait in the
/// runtime's blocking queue. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
	inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
	runtime: Option<tokio::runtime::Runtime>,
	clock: GenerationClock,
	threads: usize,
	in_flight: Arc<AtomicUsize>,
}

impl Drop for PoolInner {
	fn drop(&mut self) {
		// The last handle may be dropped on one of the pool's own threads, where
		// a joining shutdown would wait on itself.
		if let Some(runtime) = self.runtime.take() {
			runtime.shutdown_background();
		}
	}
}

impl WorkerPool {
	/// Builds a pool with `threads` blocking workers.
	pub fn new(threads: usize, thread_name: impl Into<String>) -> Result<Self, WorkerError> {
		if threads == 0 {
			return Err(WorkerError::NoThreads);
		}
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(1)
			.max_blocking_threads(threads)
			.thread_name(thread_name)
			.build()?;
		tracing::debug!(threads, "worker.pool.start");
		Ok(Self {
			inner: Arc::new(PoolInner {
				runtime: Some(runtime),
				clock: GenerationClock::new(),
				threads,
				in_flight: Arc::new(AtomicUsize::new(0)),
			}),
		})
	}

	/// Returns the configured concurrency bound.
	pub fn threads(&self) -> usize {
		self.inner.threads
	}

	/// Returns true when the calling thread is executing a task of this pool.
	///
	/// Such a thread must not block on other tasks of the same pool: they may
	/// be queued behind it.
	pub fn is_worker_thread(&self) -> bool {
		CURRENT_POOL.with(Cell::get) == self.id()
	}

	fn id(&self) -> usize {
		Arc::as_ptr(&self.inner) as usize
	}

	/// Returns the number of submitted tasks that have not finished yet.
	pub fn in_flight(&self) -> usize {
		self.inner.in_flight.load(Ordering::Acquire)
	}

	/// Submits blocking work with a fresh generation token.
	pub fn submit<F>(&self, class: TaskClass, f: F) -> TaskHandle
	where
		F: FnOnce(&GenerationToken) + Send + 'static,
	{
		let token = GenerationToken::fresh(self.inner.clock.next());
		self.submit_with(class, token, f)
	}

	/// Submits blocking work bound to a caller-provided token.
	///
	/// Lets a caller allocate the generation (and publish it) before the task
	/// can possibly start.
	#[allow(clippy::disallowed_methods)]
	pub fn submit_with<F>(&self, class: TaskClass, token: GenerationToken, f: F) -> TaskHandle
	where
		F: FnOnce(&GenerationToken) + Send + 'static,
	{
		let handle = TaskHandle::new(class, token);
		let shared = handle.shared();
		let in_flight = self.inner.in_flight.clone();
		let pool_id = self.id();
		let pending = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
		tracing::trace!(worker_class = class.as_str(), generation = handle.generation(), pending, "worker.spawn_blocking");

		let Some(runtime) = self.inner.runtime.as_ref() else {
			in_flight.fetch_sub(1, Ordering::AcqRel);
			shared.finish(TaskExit::Cancelled);
			return handle;
		};

		runtime.spawn_blocking(move || {
			let exit = if shared.token().is_cancelled() {
				TaskExit::Cancelled
			} else {
				shared.mark_running();
				let token = shared.token().clone();
				CURRENT_POOL.with(|current| current.set(pool_id));
				let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f(&token)));
				CURRENT_POOL.with(|current| current.set(0));
				match outcome {
					Ok(()) => TaskExit::Completed,
					Err(payload) => {
						let msg = panic_message(payload.as_ref());
						tracing::error!(worker_class = class.as_str(), generation = token.generation(), panic = %msg, "worker.task.panicked");
						TaskExit::Panicked(msg)
					}
				}
			};
			in_flight.fetch_sub(1, Ordering::AcqRel);
			shared.finish(exit);
		});
		handle
	}

	/// Returns the clock generations are drawn from.
	pub fn clock(&self) -> &GenerationClock {
		&self.inner.clock
	}
}
