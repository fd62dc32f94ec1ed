//! Worker runtime primitives shared by tree populators.
//!
//! A [`WorkerPool`] owns a small, fixed number of blocking worker threads.
//! Every submitted closure receives a [`GenerationToken`] it is expected to
//! poll cooperatively, and the caller gets a [`TaskHandle`] that can cancel,
//! poll, or block on completion from any thread.

mod class;
mod error;
mod pool;
mod task;
mod token;

pub use class::TaskClass;
pub use error::WorkerError;
pub use pool::WorkerPool;
pub use task::{TaskExit, TaskHandle};
pub use token::{GenerationClock, GenerationToken};
