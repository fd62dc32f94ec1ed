use std::sync::Arc;
use std::thread::ThreadId;

use arbor_worker::WorkerPool;
use parking_lot::Mutex;

use crate::config::NodesConfig;
use crate::error::Result;
use crate::lock::TreeLock;
use crate::node::Node;

/// Shared context of one tree forest.
///
/// Holds the structural lock, the worker pool running background
/// enumerations, and the identity of the dispatch thread. Cloning is cheap;
/// clones refer to the same forest.
#[derive(Clone)]
pub struct Forest {
	inner: Arc<ForestInner>,
}

struct ForestInner {
	lock: TreeLock,
	pool: WorkerPool,
	dispatch: Mutex<Option<ThreadId>>,
	config: NodesConfig,
}

impl std::fmt::Debug for Forest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Forest")
			.field("lock", &self.inner.lock)
			.field("threads", &self.inner.pool.threads())
			.field("dispatch", &*self.inner.dispatch.lock())
			.finish()
	}
}

impl Forest {
	/// Validates `config` and starts the worker pool.
	pub fn new(config: NodesConfig) -> Result<Self> {
		config.validate()?;
		let pool = WorkerPool::new(config.worker_threads, config.thread_name.clone())?;
		tracing::debug!(threads = config.worker_threads, "forest.start");
		Ok(Self {
			inner: Arc::new(ForestInner {
				lock: TreeLock::new(),
				pool,
				dispatch: Mutex::new(None),
				config,
			}),
		})
	}

	pub fn lock(&self) -> &TreeLock {
		&self.inner.lock
	}

	pub(crate) fn pool(&self) -> &WorkerPool {
		&self.inner.pool
	}

	pub fn config(&self) -> &NodesConfig {
		&self.inner.config
	}

	/// Declares the calling thread the forest's dispatch thread.
	///
	/// Immediate refreshes requested from it are scheduled in the background
	/// instead.
	pub fn bind_dispatch_thread(&self) {
		*self.inner.dispatch.lock() = Some(std::thread::current().id());
	}

	pub fn is_dispatch_thread(&self) -> bool {
		*self.inner.dispatch.lock() == Some(std::thread::current().id())
	}

	/// Builds a placeholder node named after the configured wait label.
	pub fn placeholder(&self) -> Node {
		Node::placeholder(self.inner.config.wait_label.clone())
	}
}
