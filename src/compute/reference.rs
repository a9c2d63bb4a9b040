//! CPU reference processor.
//!
//! Implements the same pixelation contract as the GPU kernel (top-left
//! sample per block) with rayon, row-parallel. [`CpuProcessor`] runs it
//! behind the same slot ring and fences as the GPU engine so the main loop
//! and the tests can drive either one.

use crate::compute::slot::{FrameTicket, SlotRing, SlotState};
use crate::compute::{FrameProcessor, OutputImage};
use crate::core::config::EngineConfig;
use crate::core::error::{FrameError, FrameResult, GpuError, GpuResult};
use crate::core::types::{Frame, Resolution, BYTES_PER_PIXEL};
use rayon::prelude::*;
use std::time::Duration;

/// Pixelate `src` (rows `src_stride` bytes apart) into tightly packed `dst`.
///
/// Output pixel `(x, y)` is input pixel `(⌊x/B⌋·B, ⌊y/B⌋·B)`. A block size
/// of 0 is treated as 1.
pub fn pixelate_rgba(src: &[u8], src_stride: usize, dst: &mut [u8], resolution: Resolution, block_size: u32) {
    let block = block_size.max(1) as usize;
    let bpp = BYTES_PER_PIXEL as usize;
    let row_bytes = resolution.row_bytes() as usize;

    dst[..resolution.frame_bytes()]
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, out_row)| {
            let src_y = (y / block) * block;
            let src_row = &src[src_y * src_stride..src_y * src_stride + row_bytes];
            for (x, px) in out_row.chunks_exact_mut(bpp).enumerate() {
                let src_x = (x / block) * block * bpp;
                px.copy_from_slice(&src_row[src_x..src_x + bpp]);
            }
        });
}

/// Pixelate a whole frame into a new tightly packed buffer.
pub fn pixelate_frame(frame: &Frame, block_size: u32) -> Vec<u8> {
    let resolution = frame.resolution();
    let mut out = vec![0u8; resolution.frame_bytes()];
    pixelate_rgba(&frame.data, frame.stride as usize, &mut out, resolution, block_size);
    out
}

/// The CPU implementation of [`FrameProcessor`].
pub struct CpuProcessor {
    resolution: Resolution,
    ring: SlotRing,
    outputs: Vec<Vec<u8>>,
    fence_timeout: Duration,
    stalled_frames: u32,
    failing_reset: bool,
    resets: u64,
}

impl CpuProcessor {
    /// Create a processor with `slots` buffering slots.
    ///
    /// # Errors
    /// `slots == 0` is rejected with the same configuration error as the
    /// GPU engine.
    pub fn new(resolution: Resolution, slots: usize, fence_timeout: Duration) -> GpuResult<Self> {
        if slots == 0 {
            return Err(GpuError::InvalidConfiguration(
                "at least one buffering slot is required".to_string(),
            ));
        }
        Ok(Self {
            resolution,
            ring: SlotRing::new(slots),
            outputs: vec![vec![0u8; resolution.frame_bytes()]; slots],
            fence_timeout,
            stalled_frames: 0,
            failing_reset: false,
            resets: 0,
        })
    }

    /// Create a processor from engine settings.
    pub fn from_config(config: &EngineConfig) -> GpuResult<Self> {
        let processor = Self::new(config.resolution(), config.slots, config.fence_timeout())?;
        log::info!(
            "CPU reference processor initialized ({}, {} slot(s))",
            config.resolution(),
            config.slots
        );
        Ok(processor)
    }

    /// Make the next `frames` submissions hang: their fences never signal,
    /// so waiting on them runs into the fence timeout.
    pub fn stall_next(&mut self, frames: u32) {
        self.stalled_frames = frames;
    }

    /// Make the next reset fail as if the transfer buffers could not be
    /// reallocated. The processor is unusable afterwards, like a GPU engine
    /// whose reset failed.
    pub fn fail_next_reset(&mut self) {
        self.failing_reset = true;
    }

    /// Number of resets performed.
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

impl FrameProcessor for CpuProcessor {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn slot_count(&self) -> usize {
        self.ring.len()
    }

    fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.ring.state(slot)
    }

    fn process_frame(&mut self, frame: &Frame, block_size: u32) -> FrameResult<FrameTicket> {
        if block_size == 0 {
            return Err(FrameError::InvalidBlockSize(block_size));
        }
        frame.check_against(self.resolution)?;

        let ticket = self.ring.begin()?;
        self.ring.advance(ticket, SlotState::Staged)?;
        self.ring.advance(ticket, SlotState::Uploading)?;

        let fence = self.ring.fence(ticket.slot).clone();
        fence.reset();
        if self.stalled_frames > 0 {
            self.stalled_frames -= 1;
            log::debug!("{ticket} stalled");
        } else {
            pixelate_rgba(
                &frame.data,
                frame.stride as usize,
                &mut self.outputs[ticket.slot],
                self.resolution,
                block_size,
            );
            fence.signal();
        }
        Ok(ticket)
    }

    fn wait(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        match self.ring.wait(ticket, self.fence_timeout, || {}) {
            Err(err) if err.reset_engine() => {
                log::warn!("{err}; resetting CPU processor");
                self.reset()?;
                Err(err)
            }
            other => other,
        }
    }

    fn output(&mut self, ticket: FrameTicket) -> FrameResult<OutputImage<'_>> {
        self.ring.require_complete(ticket)?;
        Ok(OutputImage::Host {
            pixels: &self.outputs[ticket.slot],
            resolution: self.resolution,
        })
    }

    fn release(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        self.ring.release(ticket)
    }

    fn reset(&mut self) -> FrameResult<()> {
        if std::mem::take(&mut self.failing_reset) {
            return Err(FrameError::ResetFailed(GpuError::ResourceCreation {
                resource: "CPU output buffer",
                reason: "reset refused".to_string(),
            }));
        }
        let dropped = self.ring.reset();
        self.resets += 1;
        log::debug!("CPU processor reset, {dropped} in-flight frame(s) dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modular_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]);
            }
        }
        Frame::packed(width, height, data)
    }

    #[test]
    fn test_block_one_is_identity() {
        let frame = modular_frame(37, 19);
        assert_eq!(pixelate_frame(&frame, 1), frame.data);
    }

    #[test]
    fn test_top_left_sampling() {
        let frame = modular_frame(16, 16);
        let out = pixelate_frame(&frame, 4);
        let at = |x: usize, y: usize| &out[(y * 16 + x) * 4..(y * 16 + x) * 4 + 4];
        assert_eq!(at(0, 0), &[0, 0, 0, 255]);
        assert_eq!(at(3, 3), &[0, 0, 0, 255]);
        assert_eq!(at(5, 6), &[4, 4, 8, 255]);
        assert_eq!(at(15, 15), &[12, 12, 24, 255]);
    }

    #[test]
    fn test_partial_edge_blocks() {
        let frame = modular_frame(10, 10);
        let out = pixelate_frame(&frame, 8);
        // Pixel (9, 9) belongs to the partial block starting at (8, 8).
        let offset = (9 * 10 + 9) * 4;
        assert_eq!(&out[offset..offset + 4], &[8, 8, 16, 255]);
    }

    #[test]
    fn test_honours_source_stride() {
        let frame = Frame::with_stride(2, 2, 12, vec![
            1, 1, 1, 1, 2, 2, 2, 2, 0, 0, 0, 0, //
            3, 3, 3, 3, 4, 4, 4, 4, 0, 0, 0, 0,
        ]);
        assert_eq!(pixelate_frame(&frame, 2), vec![1; 16]);
        assert_eq!(
            pixelate_frame(&frame, 1),
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]
        );
    }

    #[test]
    fn test_processor_cycle() {
        let mut cpu = CpuProcessor::new(Resolution::new(8, 8), 2, Duration::from_millis(50)).unwrap();
        let frame = modular_frame(8, 8);
        let ticket = cpu.process_frame(&frame, 4).unwrap();
        assert_eq!(cpu.slot_state(0), Some(SlotState::Dispatched));
        cpu.wait(ticket).unwrap();
        match cpu.output(ticket).unwrap() {
            OutputImage::Host { pixels, .. } => assert_eq!(pixels, &pixelate_frame(&frame, 4)[..]),
            OutputImage::Device(_) => panic!("expected host pixels"),
        }
        cpu.release(ticket).unwrap();
        assert!(cpu.is_idle());
    }

    #[test]
    fn test_stalled_frame_hangs_then_recovers() {
        let mut cpu = CpuProcessor::new(Resolution::new(8, 8), 1, Duration::from_millis(20)).unwrap();
        let frame = modular_frame(8, 8);
        cpu.stall_next(1);

        let ticket = cpu.process_frame(&frame, 2).unwrap();
        let err = cpu.wait(ticket).unwrap_err();
        assert!(matches!(err, FrameError::DeviceHang { .. }));
        assert!(cpu.is_idle());
        assert_eq!(cpu.resets(), 1);

        let next = cpu.process_frame(&frame, 2).unwrap();
        assert!(cpu.wait(next).is_ok());
    }

    #[test]
    fn test_failed_reset_after_hang_is_fatal() {
        let mut cpu = CpuProcessor::new(Resolution::new(8, 8), 1, Duration::from_millis(20)).unwrap();
        cpu.stall_next(1);
        cpu.fail_next_reset();

        let ticket = cpu.process_frame(&modular_frame(8, 8), 2).unwrap();
        let err = cpu.wait(ticket).unwrap_err();
        assert!(matches!(err, FrameError::ResetFailed(_)));
        assert!(!err.is_recoverable());
        assert_eq!(cpu.resets(), 0);
    }

    #[test]
    fn test_zero_slots_rejected() {
        let result = CpuProcessor::new(Resolution::new(8, 8), 0, Duration::from_millis(20));
        assert!(matches!(result, Err(GpuError::InvalidConfiguration(_))));

        let config = EngineConfig {
            slots: 0,
            ..EngineConfig::default()
        };
        assert!(CpuProcessor::from_config(&config).is_err());
    }
}
