//! Progress and throughput tracking for the main loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// The loop has started.
    Started {
        /// Frame budget, `None` when running until the stream ends
        frame_budget: Option<u64>,
    },
    /// A frame was presented.
    FramePresented { sequence: u64, latency_ms: u64 },
    /// A frame was dropped after a recoverable error.
    FrameDropped { reason: String },
    /// The processor was reset after a device hang.
    EngineReset { dropped_in_flight: usize },
    /// Throughput over the last reporting interval.
    Throughput {
        frames: u64,
        fps: f64,
        elapsed_ms: u64,
    },
    /// The loop has finished.
    Completed {
        total_duration_ms: u64,
        frames_presented: u64,
        frames_dropped: u64,
    },
    /// The loop was cancelled.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks presented and dropped frames, reports throughput and allows
/// cancellation from another thread.
pub struct ProgressTracker {
    frame_budget: Option<u64>,
    fps_interval: u64,
    presented: AtomicU64,
    dropped: AtomicU64,
    resets: AtomicU64,
    cancelled: AtomicBool,
    start_time: Option<Instant>,
    callback: Option<ProgressCallback>,
    /// Start of the current throughput interval and frames presented at
    /// that point.
    interval: parking_lot::Mutex<(Instant, u64)>,
}

impl ProgressTracker {
    /// Create a tracker reporting throughput every `fps_interval` frames
    /// (0 disables throughput reports).
    pub fn new(frame_budget: Option<u64>, fps_interval: u64) -> Self {
        Self {
            frame_budget,
            fps_interval,
            presented: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: None,
            callback: None,
            interval: parking_lot::Mutex::new((Instant::now(), 0)),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.start_time = Some(now);
        *self.interval.lock() = (now, 0);
        self.send_update(ProgressUpdate::Started {
            frame_budget: self.frame_budget,
        });
    }

    /// Report that a frame was presented.
    pub fn frame_presented(&self, sequence: u64, latency_ms: u64) {
        let presented = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        self.send_update(ProgressUpdate::FramePresented { sequence, latency_ms });

        if self.fps_interval > 0 && presented % self.fps_interval == 0 {
            self.send_throughput(presented);
        }
    }

    /// Report that a frame was dropped.
    pub fn frame_dropped(&self, reason: String) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::FrameDropped { reason });
    }

    /// Report an engine reset.
    pub fn engine_reset(&self, dropped_in_flight: usize) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::EngineReset { dropped_in_flight });
    }

    /// Check if the loop should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Complete tracking.
    pub fn complete(&self) {
        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: self.elapsed_ms(),
            frames_presented: self.frames_presented(),
            frames_dropped: self.frames_dropped(),
        });
    }

    /// Frames presented so far.
    pub fn frames_presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Frames dropped so far.
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Engine resets so far.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Milliseconds since `start`.
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Fraction of the frame budget presented, in percent.
    pub fn progress_percent(&self) -> Option<f32> {
        let budget = self.frame_budget?;
        if budget == 0 {
            return Some(100.0);
        }
        Some((self.frames_presented() as f32 / budget as f32 * 100.0).min(100.0))
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_throughput(&self, presented: u64) {
        let (frames, elapsed) = {
            let mut interval = self.interval.lock();
            let elapsed = interval.0.elapsed();
            let frames = presented - interval.1;
            *interval = (Instant::now(), presented);
            (frames, elapsed)
        };
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 { frames as f64 / secs } else { 0.0 };
        log::info!("{frames} frames in {:.1} ms ({fps:.1} fps)", secs * 1000.0);
        self.send_update(ProgressUpdate::Throughput {
            frames,
            fps,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(None, 0)
    }
}
