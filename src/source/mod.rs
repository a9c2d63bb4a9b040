//! Frame sources.
//!
//! A source produces RGBA8 frames at one fixed, declared resolution. The
//! declared resolution is checked against the engine's when the source is
//! opened, so a mismatch is a configuration error rather than a per-frame
//! one.

pub mod device;
pub mod synthetic;

use crate::core::config::{SourceConfig, SourceKind};
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::types::{Frame, Resolution};

pub use device::{yuyv_to_rgba, DeviceSource};
pub use synthetic::SyntheticSource;

/// Something that produces frames on demand.
pub trait FrameSource {
    /// Source name for logs.
    fn name(&self) -> &'static str;

    /// Resolution of every frame this source produces.
    fn resolution(&self) -> Resolution;

    /// Produce the next frame.
    ///
    /// # Errors
    /// [`CaptureError::CaptureTimeout`] if no frame arrived in time (the
    /// caller may try again), [`CaptureError::EndOfStream`] once the source
    /// is exhausted.
    fn capture_frame(&mut self) -> CaptureResult<Frame>;

    /// Release the underlying device. Further captures report end of stream.
    fn close(&mut self);

    /// Frames produced so far.
    fn frames_captured(&self) -> u64;
}

/// Open the source described by `config` for an engine running at
/// `engine_resolution`.
///
/// # Errors
/// [`CaptureError::ResolutionMismatch`] if the source's declared resolution
/// differs from the engine's, [`CaptureError::DeviceUnavailable`] if the
/// capture device cannot be opened.
pub fn open_source(
    config: &SourceConfig,
    engine_resolution: Resolution,
) -> CaptureResult<Box<dyn FrameSource>> {
    let resolution = config.declared_resolution(engine_resolution);
    if resolution != engine_resolution {
        return Err(CaptureError::ResolutionMismatch {
            source_resolution: resolution,
            engine_resolution,
        });
    }

    let source: Box<dyn FrameSource> = match config.kind {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(
            resolution,
            config.pattern,
            config.frame_limit,
        )),
        SourceKind::Device => Box::new(DeviceSource::open(
            &config.path,
            resolution,
            config.capture_timeout(),
        )?),
    };
    log::info!("opened {} source at {resolution}", source.name());
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Pattern;

    #[test]
    fn test_open_synthetic() {
        let config = SourceConfig {
            pattern: Pattern::Modular,
            ..SourceConfig::default()
        };
        let mut source = open_source(&config, Resolution::new(32, 16)).unwrap();
        assert_eq!(source.resolution(), Resolution::new(32, 16));
        let frame = source.capture_frame().unwrap();
        assert!(frame.check_against(Resolution::new(32, 16)).is_ok());
    }

    #[test]
    fn test_resolution_mismatch_at_open() {
        let config = SourceConfig {
            width: Some(640),
            height: Some(480),
            ..SourceConfig::default()
        };
        let err = open_source(&config, Resolution::new(64, 64)).err().unwrap();
        assert!(matches!(err, CaptureError::ResolutionMismatch { .. }));
    }

    #[test]
    fn test_missing_device() {
        let config = SourceConfig {
            kind: SourceKind::Device,
            path: "/nonexistent/video9".into(),
            ..SourceConfig::default()
        };
        let err = open_source(&config, Resolution::new(64, 64)).err().unwrap();
        assert!(matches!(err, CaptureError::DeviceUnavailable { .. }));
    }
}
