//! # Obscura - GPU frame pixelation
//!
//! Obscura captures video frames, pixelates them on the GPU with a compute
//! kernel and hands the result to a presentation sink, one frame at a time
//! through a small ring of buffering slots.
//!
//! ## Features
//!
//! - **Explicit device setup**: adapter ranking, feature checks and a
//!   memory-type resolver with clear, fatal startup errors
//! - **Slot ring**: N in-flight frames, each with its own images, transfer
//!   buffers and fence; CPU upload of frame N+1 overlaps GPU work on frame N
//! - **Bounded waits**: every wait on the GPU has a timeout; a hang resets
//!   the engine and drops the frames in flight instead of freezing
//! - **CPU reference**: the same contract implemented with rayon, used as a
//!   fallback backend and as the oracle in tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use obscura::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::default();
//! let ctx = Arc::new(DeviceContext::initialize(&config.device)?);
//! let mut engine = ComputeEngine::new(ctx, &config.engine)?;
//! let mut source = open_source(&config.source, config.engine.resolution())?;
//! let mut sink = HeadlessSink::new();
//!
//! let stats = Runner::new(RunOptions::from_config(&config))
//!     .run(&mut engine, source.as_mut(), &mut sink)?;
//! println!("{stats}");
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: frames, resolutions, errors and configuration
//! - [`gpu`]: device context, memory types, fences, images and the kernel
//! - [`compute`]: the slot ring, command sequences and the processors
//! - [`source`]: frame sources (synthetic patterns, capture devices)
//! - [`sink`]: presentation sinks (headless, PNG files)
//! - [`execution`]: the main loop and progress reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compute;
pub mod core;
pub mod execution;
pub mod gpu;
pub mod sink;
pub mod source;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use obscura::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{Frame, Resolution, BYTES_PER_PIXEL};

    // Configuration
    pub use crate::core::config::{
        Backend, DeviceConfig, EngineConfig, Pattern, PipelineConfig, RunConfig, SinkConfig,
        SinkKind, SourceConfig, SourceKind,
    };

    // Errors
    pub use crate::core::error::{
        CaptureError, ConfigError, FrameError, GpuError, ObscuraError, ObscuraResult, SinkError,
    };

    // GPU
    pub use crate::gpu::{DeviceContext, Fence, GpuImage, KernelSource, MemoryProperties};

    // Compute
    pub use crate::compute::{
        pixelate_frame, ComputeEngine, CpuProcessor, FrameProcessor, FrameTicket, OutputImage,
        SlotState,
    };

    // Sources and sinks
    pub use crate::sink::{open_sink, HeadlessSink, PngSink, PresentationSink};
    pub use crate::source::{open_source, DeviceSource, FrameSource, SyntheticSource};

    // Execution
    pub use crate::execution::{
        ProgressCallback, ProgressTracker, ProgressUpdate, RunOptions, RunStats, Runner,
        StopReason,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
