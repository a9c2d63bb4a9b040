//! The compute engine: per-frame upload, transform and result retrieval.
//!
//! [`FrameProcessor`] is the seam the main loop drives. [`ComputeEngine`]
//! implements it on the GPU; [`CpuProcessor`] implements the same contract
//! on the CPU and serves as the reference in tests.

pub mod commands;
pub mod engine;
pub mod reference;
pub mod slot;

use crate::core::error::FrameResult;
use crate::core::types::{Frame, Resolution};
use crate::gpu::image::GpuImage;

pub use commands::{Command, CommandSequence, ImageLayout, ImageRole};
pub use engine::{ComputeEngine, EngineStats};
pub use reference::{pixelate_frame, pixelate_rgba, CpuProcessor};
pub use slot::{FrameTicket, SlotRing, SlotState};

/// A finished frame, as handed to a presentation sink.
#[derive(Clone, Copy)]
pub enum OutputImage<'a> {
    /// Tightly packed RGBA8 pixels in host memory
    Host {
        pixels: &'a [u8],
        resolution: Resolution,
    },
    /// The device-resident OUTPUT image
    Device(&'a GpuImage),
}

impl OutputImage<'_> {
    /// Resolution of the image.
    pub fn resolution(&self) -> Resolution {
        match self {
            OutputImage::Host { resolution, .. } => *resolution,
            OutputImage::Device(image) => image.resolution,
        }
    }

    /// Host pixels, if this image lives in host memory.
    pub fn host_pixels(&self) -> Option<&[u8]> {
        match self {
            OutputImage::Host { pixels, .. } => Some(pixels),
            OutputImage::Device(_) => None,
        }
    }

    /// Short name of the image location.
    pub fn kind(&self) -> &'static str {
        match self {
            OutputImage::Host { .. } => "host",
            OutputImage::Device(_) => "device",
        }
    }
}

/// Something that pixelates frames through a ring of buffering slots.
///
/// Usage per frame: `process_frame` → `wait` → `output` → `release`.
/// Several frames may be between `process_frame` and `release` at once, one
/// per slot.
pub trait FrameProcessor {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Resolution every frame must have.
    fn resolution(&self) -> Resolution;

    /// Number of buffering slots.
    fn slot_count(&self) -> usize;

    /// State of slot `slot`.
    fn slot_state(&self, slot: usize) -> Option<SlotState>;

    /// Stage, upload and dispatch one frame. Returns once the work is
    /// queued; the frame is not retained.
    fn process_frame(&mut self, frame: &Frame, block_size: u32) -> FrameResult<FrameTicket>;

    /// Block until the ticket's frame is complete, bounded by the fence
    /// timeout. A timeout resets the processor and reports a device hang.
    fn wait(&mut self, ticket: FrameTicket) -> FrameResult<()>;

    /// The finished image of a complete frame.
    fn output(&mut self, ticket: FrameTicket) -> FrameResult<OutputImage<'_>>;

    /// Free the ticket's slot for the next frame.
    fn release(&mut self, ticket: FrameTicket) -> FrameResult<()>;

    /// Drop all in-flight work and return every slot to idle.
    fn reset(&mut self) -> FrameResult<()>;

    /// Whether every slot is idle.
    fn is_idle(&self) -> bool {
        (0..self.slot_count()).all(|i| self.slot_state(i) == Some(SlotState::Idle))
    }
}
