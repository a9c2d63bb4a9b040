//! Error types for Obscura.
//!
//! Uses thiserror for structured errors with context. The taxonomy follows
//! the three failure classes of the pipeline:
//! - Fatal/startup errors ([`GpuError`], [`ConfigError`]) abort initialization
//! - Per-frame errors ([`FrameError`], [`CaptureError`]) drop one frame
//! - Device hangs trigger an engine reset and only escalate if the reset fails

use crate::core::types::Resolution;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for Obscura.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum ObscuraError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Presentation error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors raised while bringing up the device or the compute engine.
///
/// None of these are retried: a partially built engine is never used.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no suitable GPU adapter found (allow_software_adapter = {allow_software})")]
    NoSuitableAdapter { allow_software: bool },

    #[error("adapter '{adapter}' lacks required features: {missing}")]
    MissingFeatures { adapter: String, missing: String },

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("resolution {resolution} is not supported (max texture dimension {max_dimension})")]
    UnsupportedResolution { resolution: Resolution, max_dimension: u32 },

    #[error("texture format {format:?} does not support {usage}")]
    UnsupportedFormat { format: wgpu::TextureFormat, usage: String },

    #[error("no memory type matches bits {required_bits:#06b} with properties {desired}")]
    NoCompatibleMemoryType { required_bits: u32, desired: String },

    #[error("failed to load kernel from {path}: {reason}")]
    KernelLoad { path: PathBuf, reason: String },

    #[error("kernel compilation failed: {0}")]
    KernelCompile(String),

    #[error("failed to create {resource}: {reason}")]
    ResourceCreation { resource: &'static str, reason: String },

    #[error("invalid engine configuration: {0}")]
    InvalidConfiguration(String),
}

/// Per-frame failures reported by `process_frame`, `wait` and `output`.
///
/// Apart from [`FrameError::DeviceLost`] and [`FrameError::ResetFailed`],
/// the engine stays usable after any of these.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame size mismatch: expected {expected_len} bytes for {expected}, got {actual_len} bytes for {actual} (stride {stride})")]
    SizeMismatch {
        expected: Resolution,
        expected_len: usize,
        actual: Resolution,
        actual_len: usize,
        stride: u32,
    },

    #[error("block size must be at least 1, got {0}")]
    InvalidBlockSize(u32),

    #[error("slot {slot} is busy ({state})")]
    SlotBusy { slot: usize, state: SlotStateName },

    #[error("ticket for frame #{sequence} in slot {slot} is no longer valid")]
    StaleTicket { slot: usize, sequence: u64 },

    #[error("frame #{sequence} in slot {slot} has not completed ({state})")]
    NotComplete {
        slot: usize,
        sequence: u64,
        state: SlotStateName,
    },

    #[error("device hang: slot {slot} did not signal within {timeout:?}")]
    DeviceHang { slot: usize, timeout: Duration },

    #[error("GPU device lost")]
    DeviceLost,

    #[error("buffer mapping failed for {buffer}: {reason}")]
    Mapping { buffer: &'static str, reason: String },

    #[error("engine reset after device hang failed: {0}")]
    ResetFailed(#[source] GpuError),
}

/// Name of a slot state, carried inside errors.
///
/// Kept separate from the state machine so errors stay `'static` and cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStateName(pub &'static str);

impl fmt::Display for SlotStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Errors from a frame source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device {path} unavailable: {reason}")]
    DeviceUnavailable { path: PathBuf, reason: String },

    #[error("source resolution {source_resolution} does not match engine resolution {engine_resolution}")]
    ResolutionMismatch {
        source_resolution: Resolution,
        engine_resolution: Resolution,
    },

    #[error("capture timed out after {0:?}")]
    CaptureTimeout(Duration),

    #[error("end of stream")]
    EndOfStream,

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a presentation sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("presentation surface lost: {0}")]
    SurfaceLost(String),

    #[error("sink cannot consume {0} images")]
    UnsupportedImage(&'static str),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Errors loading or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Error Utilities
// ============================================================================

impl FrameError {
    /// Check if the main loop may drop this frame and continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FrameError::DeviceLost | FrameError::ResetFailed(_))
    }

    /// Check if this error invalidated every in-flight frame.
    pub fn reset_engine(&self) -> bool {
        matches!(self, FrameError::DeviceHang { .. })
    }
}

impl CaptureError {
    /// Check if the main loop may skip this capture and try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::CaptureTimeout(_))
    }
}

/// Result type alias for Obscura operations.
pub type ObscuraResult<T> = Result<T, ObscuraError>;

/// Result type alias for device and engine setup.
pub type GpuResult<T> = Result<T, GpuError>;

/// Result type alias for per-frame operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Result type alias for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_recoverability() {
        assert!(FrameError::InvalidBlockSize(0).is_recoverable());
        assert!(FrameError::DeviceHang {
            slot: 0,
            timeout: Duration::from_millis(10)
        }
        .is_recoverable());
        assert!(!FrameError::DeviceLost.is_recoverable());
        assert!(!FrameError::ResetFailed(GpuError::KernelCompile("x".into())).is_recoverable());
    }

    #[test]
    fn test_capture_error_recoverability() {
        assert!(CaptureError::CaptureTimeout(Duration::from_millis(5)).is_recoverable());
        assert!(!CaptureError::EndOfStream.is_recoverable());
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = FrameError::SizeMismatch {
            expected: Resolution::new(64, 64),
            expected_len: 64 * 64 * 4,
            actual: Resolution::new(64, 64),
            actual_len: 100,
            stride: 256,
        };
        let msg = err.to_string();
        assert!(msg.contains("16384"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_top_level_conversion() {
        let err: ObscuraError = CaptureError::EndOfStream.into();
        assert!(matches!(err, ObscuraError::Capture(CaptureError::EndOfStream)));
    }
}
