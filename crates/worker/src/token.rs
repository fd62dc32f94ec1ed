use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Issues increasing generation numbers to scheduled runs.
///
/// Clones share one counter, so a whole pool draws from the same sequence.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	next: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Clock whose first issued generation is 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Issues a new generation.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Last issued generation, 0 before the first.
	pub fn current(&self) -> u64 {
		self.next.load(Ordering::Acquire)
	}
}

/// Cancellation flag tagged with the generation of the run it belongs to.
///
/// Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	cancel: CancellationToken,
}

impl GenerationToken {
	pub fn new(generation: u64, cancel: CancellationToken) -> Self {
		Self { generation, cancel }
	}

	/// Creates a token for `generation` that has never been cancelled.
	pub fn fresh(generation: u64) -> Self {
		Self::new(generation, CancellationToken::new())
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Cancels this run and every clone of the token.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}
}
