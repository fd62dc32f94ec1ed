//! Drivers that run a [`crate::KeyFactory`] and commit its keys.

mod background;
mod list;
mod sync;

use std::time::Duration;

pub(crate) use self::background::AsyncPopulator;
pub(crate) use self::list::{CreateNodes, ListPopulator};
pub(crate) use self::sync::SyncPopulator;
use crate::node::Node;

/// Lifecycle of a background enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulatorPhase {
	/// Nothing scheduled since the last deactivation.
	Idle,
	/// Submitted to the worker pool, not started yet.
	Scheduled,
	/// `create_keys` is being called.
	Running,
	/// The full key list was committed.
	Completed,
	/// Abandoned by deactivation.
	Cancelled,
}

/// Seam between an entry support and the driver feeding it.
pub(crate) trait Populator<K>: Send + Sync {
	/// The position started being used.
	fn activate(&self);

	/// The position stopped being used; its keys must be cleared.
	fn deactivate(&self);

	/// Recomputes the key list.
	fn refresh(&self, immediate: bool);

	/// Blocks until no enumeration is in flight, or `timeout` elapses.
	fn await_quiescent(&self, timeout: Option<Duration>);

	fn create_nodes(&self, key: &K) -> Vec<Node>;

	fn wait_node(&self) -> Option<Node>;

	fn destroy_nodes(&self, nodes: &[Node]);

	/// True once a complete key list was committed and not cleared since.
	fn is_initialized(&self) -> bool;

	/// Background phase, if this driver runs in the background at all.
	fn phase(&self) -> Option<PopulatorPhase>;
}
