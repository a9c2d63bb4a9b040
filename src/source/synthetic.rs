//! Generated test patterns.

use crate::core::config::Pattern;
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::types::{Frame, Resolution};
use crate::source::FrameSource;

/// Render `pattern` at `resolution` as a tightly packed RGBA8 frame.
///
/// - `Gradient`: r = x·255/w, g = y·255/h, b = (x+y)·255/(w+h), a = 255
/// - `Modular`: (x mod 256, y mod 256, (x+y) mod 256, 255)
pub fn render_pattern(pattern: Pattern, resolution: Resolution) -> Frame {
    let Resolution { width, height } = resolution;
    let mut data = Vec::with_capacity(resolution.frame_bytes());
    for y in 0..height {
        for x in 0..width {
            let px = match pattern {
                Pattern::Gradient => [
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    ((x + y) * 255 / (width + height)) as u8,
                    255,
                ],
                Pattern::Modular => [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255],
            };
            data.extend_from_slice(&px);
        }
    }
    Frame::packed(width, height, data)
}

/// A source that repeats one rendered pattern.
pub struct SyntheticSource {
    template: Frame,
    frame_limit: Option<u64>,
    captured: u64,
    closed: bool,
}

impl SyntheticSource {
    /// Create a source; `frame_limit` ends the stream after that many
    /// frames.
    pub fn new(resolution: Resolution, pattern: Pattern, frame_limit: Option<u64>) -> Self {
        Self {
            template: render_pattern(pattern, resolution),
            frame_limit,
            captured: 0,
            closed: false,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn resolution(&self) -> Resolution {
        self.template.resolution()
    }

    fn capture_frame(&mut self) -> CaptureResult<Frame> {
        if self.closed || self.frame_limit.is_some_and(|limit| self.captured >= limit) {
            return Err(CaptureError::EndOfStream);
        }
        self.captured += 1;
        Ok(self.template.clone())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn frames_captured(&self) -> u64 {
        self.captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modular_pattern() {
        let frame = render_pattern(Pattern::Modular, Resolution::new(300, 2));
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(7, 1), [7, 1, 8, 255]);
        assert_eq!(frame.pixel(259, 1), [3, 1, 4, 255]);
    }

    #[test]
    fn test_gradient_pattern() {
        let frame = render_pattern(Pattern::Gradient, Resolution::new(64, 32));
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(32, 16), [127, 127, 127, 255]);
        assert_eq!(frame.pixel(63, 31), [251, 247, 249, 255]);
    }

    #[test]
    fn test_frame_limit_ends_stream() {
        let mut source = SyntheticSource::new(Resolution::new(4, 4), Pattern::Gradient, Some(2));
        assert!(source.capture_frame().is_ok());
        assert!(source.capture_frame().is_ok());
        assert!(matches!(source.capture_frame(), Err(CaptureError::EndOfStream)));
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn test_close_ends_stream() {
        let mut source = SyntheticSource::new(Resolution::new(4, 4), Pattern::Modular, None);
        source.close();
        assert!(matches!(source.capture_frame(), Err(CaptureError::EndOfStream)));
    }
}
