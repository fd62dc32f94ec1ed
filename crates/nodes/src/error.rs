//! Error types for tree population.

use std::path::PathBuf;

use arbor_worker::WorkerError;
use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum NodesError {
	/// The factory already feeds another live children object.
	#[error("key factory is already attached to a children object")]
	FactoryAlreadyAttached,

	/// The forest's worker pool could not be started.
	#[error(transparent)]
	Worker(#[from] WorkerError),

	/// The forest configuration was rejected.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Errors raised while loading [`crate::NodesConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but is out of range.
	#[error("invalid configuration value for {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

/// Bookkeeping that can only go wrong through an unstable key
/// equality/hash or a mutation that bypassed the tree lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyFault {
	/// Cached nodes were required for an entry that has none.
	#[error("no cached nodes for entry {entry}")]
	MissingCacheEntry { entry: String },

	/// A computed delta does not line up with the tracked nodes.
	#[error("delta does not match tracked nodes: {detail}; previous={previous:?} current={current:?} delta={delta:?}")]
	DeltaMismatch {
		detail: String,
		previous: Vec<String>,
		current: Vec<String>,
		delta: Vec<usize>,
	},
}

/// Cooperative cancellation signal returned by [`crate::KeySink::push`].
///
/// Factories propagate it with `?`; populators swallow it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("key computation cancelled")]
pub struct Cancelled;

/// Result type for fallible tree operations.
pub type Result<T> = std::result::Result<T, NodesError>;
