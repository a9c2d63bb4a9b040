//! A sink that writes frames to PNG files.

use crate::compute::OutputImage;
use crate::core::error::SinkError;
use crate::sink::PresentationSink;
use image::{ImageBuffer, Rgba};
use std::path::{Path, PathBuf};

/// Writes every Nth host frame as `frame_NNNNNN.png`.
#[derive(Debug)]
pub struct PngSink {
    dir: PathBuf,
    every: u64,
    presented: u64,
    written: u64,
}

impl PngSink {
    /// Create the output directory if needed and open the sink.
    pub fn create(dir: &Path, every: u64) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            every: every.max(1),
            presented: 0,
            written: 0,
        })
    }

    /// Files written so far.
    pub fn files_written(&self) -> u64 {
        self.written
    }

    /// Path of the file for frame `index`.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl PresentationSink for PngSink {
    fn name(&self) -> &'static str {
        "png"
    }

    fn present(&mut self, image: OutputImage<'_>) -> Result<(), SinkError> {
        let index = self.presented;
        self.presented += 1;
        if index % self.every != 0 {
            return Ok(());
        }

        let OutputImage::Host { pixels, resolution } = image else {
            return Err(SinkError::UnsupportedImage("device-resident"));
        };
        if !self.dir.is_dir() {
            return Err(SinkError::SurfaceLost(format!(
                "output directory {} is gone",
                self.dir.display()
            )));
        }

        let buffer: ImageBuffer<Rgba<u8>, &[u8]> =
            ImageBuffer::from_raw(resolution.width, resolution.height, pixels)
                .ok_or(SinkError::UnsupportedImage("truncated"))?;
        let path = self.frame_path(index);
        buffer.save(&path)?;
        self.written += 1;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    fn wants_host_pixels(&self) -> bool {
        true
    }

    fn frames_presented(&self) -> u64 {
        self.presented
    }
}
