//! A sink that only counts frames.

use crate::compute::OutputImage;
use crate::core::error::SinkError;
use crate::sink::PresentationSink;

/// Discards frames; optionally asks to close after a number of them.
#[derive(Debug, Default)]
pub struct HeadlessSink {
    presented: u64,
    close_after: Option<u64>,
    last_checksum: Option<u64>,
}

impl HeadlessSink {
    /// Create a sink that never asks to close.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that asks to close after `frames` frames.
    pub fn close_after(frames: u64) -> Self {
        Self {
            close_after: Some(frames),
            ..Self::default()
        }
    }

    /// Byte sum of the last host frame presented.
    pub fn last_checksum(&self) -> Option<u64> {
        self.last_checksum
    }
}

impl PresentationSink for HeadlessSink {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn present(&mut self, image: OutputImage<'_>) -> Result<(), SinkError> {
        self.last_checksum = image
            .host_pixels()
            .map(|pixels| pixels.iter().map(|&b| b as u64).sum());
        self.presented += 1;
        log::trace!("presented {} frame #{}", image.kind(), self.presented);
        Ok(())
    }

    fn should_close(&self) -> bool {
        self.close_after.is_some_and(|limit| self.presented >= limit)
    }

    fn frames_presented(&self) -> u64 {
        self.presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resolution;

    #[test]
    fn test_counts_and_closes() {
        let mut sink = HeadlessSink::close_after(2);
        let pixels = [1u8, 2, 3, 4];
        let image = OutputImage::Host {
            pixels: &pixels,
            resolution: Resolution::new(1, 1),
        };
        sink.present(image).unwrap();
        assert!(!sink.should_close());
        assert_eq!(sink.last_checksum(), Some(10));
        sink.present(image).unwrap();
        assert!(sink.should_close());
        assert_eq!(sink.frames_presented(), 2);
    }
}
