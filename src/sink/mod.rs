//! Presentation sinks.
//!
//! A sink consumes each finished frame once and never mutates it. Sinks that
//! can only handle host pixels say so through
//! [`PresentationSink::wants_host_pixels`] so the engine can be configured
//! to read results back.

pub mod headless;
pub mod png;

use crate::compute::OutputImage;
use crate::core::config::{SinkConfig, SinkKind};
use crate::core::error::SinkError;

pub use self::png::PngSink;
pub use headless::HeadlessSink;

/// Something that consumes finished frames.
pub trait PresentationSink {
    /// Sink name for logs.
    fn name(&self) -> &'static str;

    /// Consume one finished frame.
    ///
    /// # Errors
    /// [`SinkError::SurfaceLost`] if the presentation target went away.
    fn present(&mut self, image: OutputImage<'_>) -> Result<(), SinkError>;

    /// Whether the consumer asked the pipeline to stop.
    fn should_close(&self) -> bool {
        false
    }

    /// Whether this sink needs frames in host memory.
    fn wants_host_pixels(&self) -> bool {
        false
    }

    /// Frames presented so far.
    fn frames_presented(&self) -> u64;
}

/// Create the sink described by `config`.
pub fn open_sink(config: &SinkConfig) -> Result<Box<dyn PresentationSink>, SinkError> {
    let sink: Box<dyn PresentationSink> = match config.kind {
        SinkKind::Headless => Box::new(HeadlessSink::new()),
        SinkKind::Png => {
            let dir = config
                .dir
                .as_deref()
                .ok_or_else(|| SinkError::SurfaceLost("no output directory configured".to_string()))?;
            Box::new(PngSink::create(dir, config.every)?)
        }
    };
    log::info!("opened {} sink", sink.name());
    Ok(sink)
}
