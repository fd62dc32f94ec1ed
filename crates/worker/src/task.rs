use std::any::Any;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{GenerationToken, TaskClass};

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
	/// The closure ran to completion.
	Completed,
	/// The token was cancelled before the closure started; it never ran.
	Cancelled,
	/// The closure panicked; carries the panic message when one was available.
	Panicked(String),
}

/// Lifecycle of one submitted task.
#[derive(Debug)]
enum TaskState {
	/// Queued on the pool, not yet picked up by a worker.
	Queued,
	/// Executing on the given worker thread.
	Running(ThreadId),
	/// Finished; later joiners return immediately.
	Done(TaskExit),
}

#[derive(Debug)]
pub(crate) struct TaskShared {
	class: TaskClass,
	token: GenerationToken,
	state: Mutex<TaskState>,
	done: Condvar,
}

impl TaskShared {
	pub(crate) fn mark_running(&self) {
		*self.state.lock() = TaskState::Running(std::thread::current().id());
	}

	pub(crate) fn finish(&self, exit: TaskExit) {
		let mut state = self.state.lock();
		*state = TaskState::Done(exit);
		self.done.notify_all();
	}

	pub(crate) fn token(&self) -> &GenerationToken {
		&self.token
	}
}

/// Handle to a task submitted to a [`crate::WorkerPool`].
///
/// Handles are cheap to clone; any number of threads may join the same task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
	shared: Arc<TaskShared>,
}

impl TaskHandle {
	pub(crate) fn new(class: TaskClass, token: GenerationToken) -> Self {
		Self {
			shared: Arc::new(TaskShared {
				class,
				token,
				state: Mutex::new(TaskState::Queued),
				done: Condvar::new(),
			}),
		}
	}

	pub(crate) fn shared(&self) -> Arc<TaskShared> {
		self.shared.clone()
	}

	/// Returns the class the task was submitted with.
	pub fn class(&self) -> TaskClass {
		self.shared.class
	}

	/// Returns the generation assigned at submission.
	pub fn generation(&self) -> u64 {
		self.shared.token.generation()
	}

	/// Returns the cancellation token handed to the task.
	pub fn token(&self) -> &GenerationToken {
		&self.shared.token
	}

	/// Requests cooperative cancellation.
	///
	/// A queued task will not start; a running task observes the request the
	/// next time it polls its token.
	pub fn cancel(&self) {
		tracing::trace!(worker_class = self.shared.class.as_str(), generation = self.generation(), "worker.task.cancel");
		self.shared.token.cancel();
	}

	/// Returns true once cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.shared.token.is_cancelled()
	}

	/// Returns true once the task reached a terminal state.
	pub fn is_finished(&self) -> bool {
		matches!(*self.shared.state.lock(), TaskState::Done(_))
	}

	/// Returns true when the calling thread is the worker executing this task.
	///
	/// Joining from that thread would never return.
	pub fn is_current_thread(&self) -> bool {
		matches!(*self.shared.state.lock(), TaskState::Running(id) if id == std::thread::current().id())
	}

	/// Returns the exit status if the task already finished.
	pub fn exit(&self) -> Option<TaskExit> {
		match &*self.shared.state.lock() {
			TaskState::Done(exit) => Some(exit.clone()),
			_ => None,
		}
	}

	/// Blocks until the task finishes.
	///
	/// Calling this from the worker thread running the task deadlocks; check
	/// [`Self::is_current_thread`] first when that is possible.
	pub fn join(&self) -> TaskExit {
		let mut state = self.shared.state.lock();
		loop {
			if let TaskState::Done(exit) = &*state {
				return exit.clone();
			}
			self.shared.done.wait(&mut state);
		}
	}

	/// Blocks until the task finishes or `timeout` elapses.
	///
	/// Returns `None` on timeout.
	pub fn join_timeout(&self, timeout: Duration) -> Option<TaskExit> {
		let deadline = Instant::now() + timeout;
		let mut state = self.shared.state.lock();
		loop {
			if let TaskState::Done(exit) = &*state {
				return Some(exit.clone());
			}
			if self.shared.done.wait_until(&mut state, deadline).timed_out() {
				return match &*state {
					TaskState::Done(exit) => Some(exit.clone()),
					_ => None,
				};
			}
		}
	}
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
