//! Bulk execution helpers for bursts of asynchronous work.

mod batch;
mod bounded;

pub use batch::{run_batched, BatchProcessor};
pub use bounded::{run_bounded, run_bounded_ordered};
