//! Error types for the worker pool.

use thiserror::Error;

/// Errors raised while building or using a [`crate::WorkerPool`].
#[derive(Debug, Error)]
pub enum WorkerError {
	/// The pool was configured without any worker threads.
	#[error("worker pool needs at least one thread")]
	NoThreads,

	/// The underlying runtime could not be created.
	#[error("failed to build worker runtime: {0}")]
	RuntimeBuild(#[from] std::io::Error),
}
