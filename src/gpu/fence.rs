//! Completion fences.
//!
//! A [`Fence`] is a binary "has the last submitted command sequence
//! finished" signal. It starts signaled (idle), is reset just before a
//! submission and is signaled again from the queue's work-done callback.
//!
//! Waiting is always bounded. wgpu only runs completion callbacks while the
//! device is being polled, so [`Fence::wait`] takes a poll closure and spins
//! on it with a short backoff until the fence signals or the timeout passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIN_BACKOFF: Duration = Duration::from_micros(50);
const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// The fence did not signal within the allowed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceTimeout {
    /// How long the wait lasted
    pub waited: Duration,
}

/// A binary completion signal shared with GPU callbacks.
///
/// Cloning shares the same signal. A fresh fence must be created (not
/// reset) to detach from callbacks of work that may never complete.
#[derive(Debug, Clone)]
pub struct Fence {
    signaled: Arc<AtomicBool>,
}

impl Fence {
    /// Create a fence in the signaled state.
    pub fn signaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a fence in the unsignaled state.
    pub fn unsignaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the fence is signaled.
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Move the fence to the unsignaled state.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Signal the fence.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Signal this fence once everything submitted to `queue` so far has
    /// finished executing. Call right after `queue.submit`.
    pub fn signal_on_completion(&self, queue: &wgpu::Queue) {
        let signaled = Arc::clone(&self.signaled);
        queue.on_submitted_work_done(move || {
            signaled.store(true, Ordering::Release);
        });
    }

    /// Block until the fence signals, calling `poll` between checks.
    ///
    /// Returns [`FenceTimeout`] once `timeout` has elapsed without a signal.
    /// A zero timeout checks exactly once.
    pub fn wait(&self, timeout: Duration, mut poll: impl FnMut()) -> Result<(), FenceTimeout> {
        let start = Instant::now();
        let mut backoff = MIN_BACKOFF;
        loop {
            poll();
            if self.is_signaled() {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(FenceTimeout { waited });
            }
            std::thread::sleep(backoff.min(timeout - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::signaled()
    }
}
