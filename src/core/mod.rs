//! Core types shared by every layer of the pipeline.
//!
//! - [`types`]: resolutions and host frames
//! - [`error`]: error hierarchy
//! - [`config`]: TOML pipeline configuration

pub mod config;
pub mod error;
pub mod types;

pub use config::{Backend, PipelineConfig};
pub use error::{
    CaptureError, ConfigError, FrameError, GpuError, ObscuraError, ObscuraResult, SinkError,
};
pub use types::{Frame, Resolution, BYTES_PER_PIXEL};
