//! The capture → process → present main loop.
//!
//! One host thread drives everything. Frames are submitted until every
//! buffering slot holds one, then the oldest is waited on, presented and
//! released, so capture and upload of frame N+1 overlap the GPU work of
//! frame N.
//!
//! Error policy:
//! - recoverable per-frame errors (size mismatch, capture timeout, device
//!   hang after a successful reset) drop the frame and the loop continues
//! - end of stream finishes the run cleanly
//! - device loss, failed resets, sink errors and other capture errors abort
//!   the run with an error

use crate::compute::{FrameProcessor, FrameTicket};
use crate::core::config::PipelineConfig;
use crate::core::error::{CaptureError, FrameError, ObscuraResult};
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::sink::PresentationSink;
use crate::source::FrameSource;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main loop options.
#[derive(Clone)]
pub struct RunOptions {
    /// Stop after this many captured frames; `None` runs until the stream
    /// ends.
    pub frames: Option<u64>,
    /// Pixelation block size.
    pub block_size: u32,
    /// Report throughput every N presented frames (0 = never).
    pub fps_interval: u64,
    /// Upper bound on frames in flight; the slot count when `None`.
    pub max_in_flight: Option<usize>,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressCallback>>,
    /// External stop request.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("frames", &self.frames)
            .field("block_size", &self.block_size)
            .field("fps_interval", &self.fps_interval)
            .field("max_in_flight", &self.max_in_flight)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            frames: None,
            block_size: 16,
            fps_interval: 30,
            max_in_flight: None,
            progress_callback: None,
            cancel: None,
        }
    }
}

impl RunOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options taken from a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            frames: (config.run.frames > 0).then_some(config.run.frames),
            block_size: config.engine.block_size,
            fps_interval: config.run.fps_interval,
            ..Self::default()
        }
    }

    /// Set the frame budget.
    pub fn with_frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Set the block size.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Limit frames in flight.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Stop the loop when `flag` becomes true.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The frame budget was reached
    FrameBudget,
    /// The source reported end of stream
    EndOfStream,
    /// The sink asked to close
    SinkClosed,
    /// Cancelled from outside
    Cancelled,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    /// Frames taken from the source
    pub frames_captured: u64,
    /// Frames handed to the sink
    pub frames_presented: u64,
    /// Frames lost to recoverable errors
    pub frames_dropped: u64,
    /// Engine resets after device hangs
    pub resets: u64,
    /// Wall-clock duration of the loop
    pub duration: Duration,
    /// Why the loop stopped
    pub stop_reason: StopReason,
}

impl RunStats {
    /// Presented frames per second over the whole run.
    pub fn average_fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_presented as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} captured, {} presented, {} dropped, {} reset(s) in {:.2?} ({:.1} fps, {:?})",
            self.frames_captured,
            self.frames_presented,
            self.frames_dropped,
            self.resets,
            self.duration,
            self.average_fps(),
            self.stop_reason
        )
    }
}

/// Drives a processor between a source and a sink.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    options: RunOptions,
}

struct InFlight {
    ticket: FrameTicket,
    submitted: Instant,
}

impl Runner {
    /// Create a runner.
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run options.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn tracker(&self) -> ProgressTracker {
        let tracker = ProgressTracker::new(self.options.frames, self.options.fps_interval);
        match &self.options.progress_callback {
            Some(callback) => {
                let callback = Arc::clone(callback);
                tracker.with_callback(Box::new(move |update| callback(update)))
            }
            None => tracker,
        }
    }

    fn cancel_requested(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run the loop until the frame budget, end of stream, a sink close
    /// request or cancellation.
    ///
    /// # Errors
    /// Unrecoverable frame errors, capture errors other than timeouts and
    /// end of stream, and any sink error.
    pub fn run<P, S, K>(&self, processor: &mut P, source: &mut S, sink: &mut K) -> ObscuraResult<RunStats>
    where
        P: FrameProcessor + ?Sized,
        S: FrameSource + ?Sized,
        K: PresentationSink + ?Sized,
    {
        let mut tracker = self.tracker();
        let max_in_flight = self
            .options
            .max_in_flight
            .unwrap_or(usize::MAX)
            .clamp(1, processor.slot_count().max(1));
        log::info!(
            "running {} -> {} ({}) -> {}, block size {}, {} frame(s) in flight",
            source.name(),
            processor.name(),
            processor.resolution(),
            sink.name(),
            self.options.block_size,
            max_in_flight
        );

        tracker.start();
        let result = self.run_loop(processor, source, sink, &tracker, max_in_flight);
        source.close();

        let (captured, stop_reason) = result?;
        tracker.complete();
        let stats = RunStats {
            frames_captured: captured,
            frames_presented: tracker.frames_presented(),
            frames_dropped: tracker.frames_dropped(),
            resets: tracker.resets(),
            duration: Duration::from_millis(tracker.elapsed_ms()),
            stop_reason,
        };
        log::info!("run finished: {stats}");
        if let Some(percent) = tracker.progress_percent() {
            if stats.stop_reason != StopReason::FrameBudget {
                log::info!("stopped at {percent:.0}% of the frame budget");
            }
        }
        Ok(stats)
    }

    fn run_loop<P, S, K>(
        &self,
        processor: &mut P,
        source: &mut S,
        sink: &mut K,
        tracker: &ProgressTracker,
        max_in_flight: usize,
    ) -> ObscuraResult<(u64, StopReason)>
    where
        P: FrameProcessor + ?Sized,
        S: FrameSource + ?Sized,
        K: PresentationSink + ?Sized,
    {
        let mut in_flight: VecDeque<InFlight> = VecDeque::with_capacity(max_in_flight);
        let mut captured = 0u64;
        let mut source_ended = false;

        let stop_reason = loop {
            if self.cancel_requested() || tracker.is_cancelled() {
                if !tracker.is_cancelled() {
                    tracker.cancel();
                }
                break StopReason::Cancelled;
            }
            if sink.should_close() {
                break StopReason::SinkClosed;
            }

            let budget_reached = self.options.frames.is_some_and(|n| captured >= n);
            if !budget_reached && !source_ended && in_flight.len() < max_in_flight {
                match source.capture_frame() {
                    Ok(frame) => {
                        captured += 1;
                        match processor.process_frame(&frame, self.options.block_size) {
                            Ok(ticket) => in_flight.push_back(InFlight {
                                ticket,
                                submitted: Instant::now(),
                            }),
                            Err(err) => Self::frame_failed(err, tracker, &mut in_flight)?,
                        }
                        continue;
                    }
                    Err(CaptureError::EndOfStream) => {
                        log::info!("source reached end of stream");
                        source_ended = true;
                    }
                    Err(err) if err.is_recoverable() => {
                        log::warn!("dropping capture: {err}");
                        tracker.frame_dropped(err.to_string());
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let Some(frame) = in_flight.pop_front() else {
                if budget_reached {
                    break StopReason::FrameBudget;
                }
                if source_ended {
                    break StopReason::EndOfStream;
                }
                continue;
            };
            Self::finish_frame(processor, sink, tracker, frame, &mut in_flight)?;
        };

        Self::drain(processor, in_flight);
        Ok((captured, stop_reason))
    }

    /// Wait for, present and release the oldest frame.
    fn finish_frame<P, K>(
        processor: &mut P,
        sink: &mut K,
        tracker: &ProgressTracker,
        frame: InFlight,
        in_flight: &mut VecDeque<InFlight>,
    ) -> ObscuraResult<()>
    where
        P: FrameProcessor + ?Sized,
        K: PresentationSink + ?Sized,
    {
        let ticket = frame.ticket;
        if let Err(err) = processor.wait(ticket) {
            return Self::frame_failed(err, tracker, in_flight);
        }

        let presented = match processor.output(ticket) {
            Ok(image) => sink.present(image),
            Err(err) => {
                if !err.reset_engine() {
                    if let Err(release_err) = processor.release(ticket) {
                        log::debug!("release after failed output: {release_err}");
                    }
                }
                return Self::frame_failed(err, tracker, in_flight);
            }
        };
        processor.release(ticket)?;
        presented?;

        tracker.frame_presented(ticket.sequence, frame.submitted.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Apply the error policy to one failed frame.
    fn frame_failed(
        err: FrameError,
        tracker: &ProgressTracker,
        in_flight: &mut VecDeque<InFlight>,
    ) -> ObscuraResult<()> {
        if !err.is_recoverable() {
            log::error!("{err}");
            return Err(err.into());
        }
        log::warn!("dropping frame: {err}");
        tracker.frame_dropped(err.to_string());
        if err.reset_engine() {
            // The reset invalidated every outstanding ticket.
            let lost = in_flight.len();
            for _ in in_flight.drain(..) {
                tracker.frame_dropped("in flight during engine reset".to_string());
            }
            tracker.engine_reset(lost);
        }
        Ok(())
    }

    /// Let outstanding frames finish before the processor is reused or
    /// dropped.
    fn drain<P>(processor: &mut P, in_flight: VecDeque<InFlight>)
    where
        P: FrameProcessor + ?Sized,
    {
        for frame in in_flight {
            let done = processor
                .wait(frame.ticket)
                .and_then(|_| processor.release(frame.ticket));
            if let Err(err) = done {
                log::debug!("discarding {}: {err}", frame.ticket);
            }
        }
    }
}
