//! Pipeline execution.
//!
//! [`Runner`] drives a [`FrameProcessor`](crate::compute::FrameProcessor)
//! between a frame source and a presentation sink; [`ProgressTracker`]
//! counts frames and reports throughput.

pub mod progress;
pub mod runner;

pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use runner::{RunOptions, RunStats, Runner, StopReason};
