//! The wgpu compute engine.
//!
//! INITIALIZATION ORDER
//! 1. INPUT and OUTPUT storage images per slot, device-local
//! 2. staging (and readback) buffers per slot, host-visible/coherent
//! 3. kernel compilation against the fixed binding layout
//! 4. one descriptor binding set per slot
//! 5. the slot ring with one signaled fence per slot
//!
//! Any failure aborts construction; a partially built engine is dropped and
//! its resources released with it.
//!
//! PER FRAME
//! `process_frame` validates the frame, claims the next slot, copies the
//! frame into that slot's staging buffer, records the command sequence and
//! submits it with the slot fence. It returns as soon as the work is queued.
//! `wait` observes the fence with a bounded timeout; `output` exposes the
//! result; `release` frees the slot.
//!
//! A fence timeout is a device hang: the engine resets itself (all slots
//! idle, fresh fences, fresh transfer buffers) and reports
//! [`FrameError::DeviceHang`]. If the reset fails the error is fatal.

use crate::compute::commands::CommandSequence;
use crate::compute::slot::{FrameTicket, SlotRing, SlotState};
use crate::compute::{FrameProcessor, OutputImage};
use crate::core::config::EngineConfig;
use crate::core::error::{FrameError, FrameResult, GpuError, GpuResult};
use crate::core::types::{Frame, Resolution};
use crate::gpu::context::{dispatch_size, DeviceContext};
use crate::gpu::image::{GpuImage, MapError, ReadbackBuffer, StagingBuffer};
use crate::gpu::kernel::{KernelSource, PixelateKernel, PixelateParams};
use std::sync::Arc;
use std::time::Duration;

/// GPU resources owned by one buffering slot.
///
/// Slots never share images, so frames in different slots can overlap
/// without one frame's upload clobbering another's kernel input.
pub struct SlotResources {
    pub input: GpuImage,
    pub output: GpuImage,
    pub staging: StagingBuffer,
    pub readback: Option<ReadbackBuffer>,
    /// Descriptor binding set: binding 0 = `input`, binding 1 = `output`
    pub bind_group: wgpu::BindGroup,
    host_pixels: Vec<u8>,
    host_sequence: Option<u64>,
}

struct SlotBuffers {
    input: GpuImage,
    output: GpuImage,
    staging: StagingBuffer,
    readback: Option<ReadbackBuffer>,
}

impl SlotBuffers {
    fn allocate(ctx: &DeviceContext, resolution: Resolution, readback: bool) -> GpuResult<Self> {
        let input = GpuImage::new(ctx, "slot input image", resolution)?;
        let output = GpuImage::new(ctx, "slot output image", resolution)?;
        let staging = StagingBuffer::new(ctx, "slot staging buffer", resolution)?;
        let readback = if readback {
            Some(ReadbackBuffer::new(ctx, "slot readback buffer", resolution)?)
        } else {
            None
        };
        Ok(Self {
            input,
            output,
            staging,
            readback,
        })
    }
}

impl SlotResources {
    /// Replace the host transfer buffers with new allocations.
    ///
    /// The old buffers may still be referenced by work that never finished;
    /// wgpu keeps them alive until it does.
    fn reallocate_transfer_buffers(&mut self, ctx: &DeviceContext) -> GpuResult<()> {
        let resolution = self.staging.resolution;
        self.staging = StagingBuffer::new(ctx, "slot staging buffer", resolution)?;
        if self.readback.is_some() {
            self.readback = Some(ReadbackBuffer::new(ctx, "slot readback buffer", resolution)?);
        }
        self.host_sequence = None;
        Ok(())
    }
}

/// Counters describing engine activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames submitted to the queue
    pub submitted: u64,
    /// Frames whose fence signaled
    pub completed: u64,
    /// Engine resets performed
    pub resets: u64,
}

/// GPU pixelation engine with a ring of buffering slots.
pub struct ComputeEngine {
    ctx: Arc<DeviceContext>,
    kernel: PixelateKernel,
    slots: Vec<SlotResources>,
    ring: SlotRing,
    resolution: Resolution,
    fence_timeout: Duration,
    readback: bool,
    stats: EngineStats,
}

impl ComputeEngine {
    /// Build the engine.
    ///
    /// # Errors
    /// Every failure here is fatal: unsupported resolution, kernel load or
    /// compile errors, memory-type resolution and resource creation.
    pub fn new(ctx: Arc<DeviceContext>, config: &EngineConfig) -> GpuResult<Self> {
        let resolution = config.resolution();
        if config.slots == 0 {
            return Err(GpuError::InvalidConfiguration(
                "at least one buffering slot is required".to_string(),
            ));
        }
        ctx.validate_resolution(resolution)?;

        // Steps 1-2
        let buffers = (0..config.slots)
            .map(|_| SlotBuffers::allocate(&ctx, resolution, config.readback))
            .collect::<GpuResult<Vec<_>>>()?;

        // Step 3
        let source = KernelSource::load(config.kernel.as_deref())?;
        let kernel = PixelateKernel::new(&ctx, &source)?;
        CommandSequence::pixelate(
            dispatch_size(resolution),
            PixelateParams { block_size: 1 },
            config.readback,
        )
        .validate()
        .map_err(|e| GpuError::InvalidConfiguration(e.to_string()))?;

        // Step 4
        let slots = buffers
            .into_iter()
            .map(|b| {
                let bind_group = kernel.bind_group(&ctx, "slot binding set", &b.input, &b.output)?;
                Ok(SlotResources {
                    input: b.input,
                    output: b.output,
                    staging: b.staging,
                    readback: b.readback,
                    bind_group,
                    host_pixels: Vec::new(),
                    host_sequence: None,
                })
            })
            .collect::<GpuResult<Vec<_>>>()?;

        // Step 5
        let ring = SlotRing::new(config.slots);

        log::info!(
            "compute pipeline initialized ({resolution}, {} slot(s), kernel: {})",
            config.slots,
            source.describe()
        );

        Ok(Self {
            ctx,
            kernel,
            slots,
            ring,
            resolution,
            fence_timeout: config.fence_timeout(),
            readback: config.readback,
            stats: EngineStats::default(),
        })
    }

    /// The device context this engine runs on.
    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// Resources of slot `slot`.
    pub fn slot_resources(&self, slot: usize) -> Option<&SlotResources> {
        self.slots.get(slot)
    }

    /// Activity counters.
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    fn check_device(&self) -> FrameResult<()> {
        if self.ctx.is_lost() {
            return Err(FrameError::DeviceLost);
        }
        Ok(())
    }

    fn map_failure(slot: usize, buffer: &'static str, err: MapError) -> FrameError {
        match err {
            MapError::Timeout(timeout) => FrameError::DeviceHang { slot, timeout },
            MapError::Failed(reason) => FrameError::Mapping { buffer, reason },
        }
    }

    /// Reset after a hang; returns the error to report.
    fn escalate(&mut self, err: FrameError) -> FrameError {
        if !err.reset_engine() {
            return err;
        }
        log::warn!("{err}; resetting compute engine");
        match self.reset() {
            Ok(()) => err,
            Err(reset_err) => reset_err,
        }
    }

    fn upload_and_submit(&mut self, ticket: FrameTicket, frame: &Frame, block_size: u32) -> FrameResult<()> {
        let slot = &mut self.slots[ticket.slot];
        slot.staging
            .write_frame(&self.ctx.device, frame, self.fence_timeout)
            .map_err(|e| Self::map_failure(ticket.slot, "staging", e))?;
        slot.host_sequence = None;

        let plan = CommandSequence::pixelate(
            dispatch_size(self.resolution),
            PixelateParams { block_size },
            self.readback,
        );
        debug_assert!(plan.validate().is_ok());

        let mut encoder = self.ctx.command_encoder("obscura::frame");
        plan.encode(&mut encoder, &self.kernel, slot);
        self.ring.advance(ticket, SlotState::Staged)?;

        let fence = self.ring.fence(ticket.slot).clone();
        self.ctx.submit(encoder.finish(), Some(&fence));
        self.ring.advance(ticket, SlotState::Uploading)?;
        Ok(())
    }
}

impl FrameProcessor for ComputeEngine {
    fn name(&self) -> &'static str {
        "gpu"
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
        self.check_device()?;
        if block_size == 0 {
            return Err(FrameError::InvalidBlockSize(block_size));
        }
        frame.check_against(self.resolution)?;

        let ticket = self.ring.begin()?;
        if let Err(err) = self.upload_and_submit(ticket, frame, block_size) {
            self.ring.abort(ticket);
            return Err(self.escalate(err));
        }
        self.stats.submitted += 1;
        Ok(ticket)
    }

    fn wait(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        let ctx = Arc::clone(&self.ctx);
        let waited = self.ring.wait(ticket, self.fence_timeout, || ctx.poll());
        if let Err(err) = waited {
            return Err(self.escalate(err));
        }
        self.check_device()?;
        self.stats.completed += 1;
        Ok(())
    }

    fn output(&mut self, ticket: FrameTicket) -> FrameResult<OutputImage<'_>> {
        self.ring.require_complete(ticket)?;
        if !self.readback {
            return Ok(OutputImage::Device(&self.slots[ticket.slot].output));
        }

        let slot = &mut self.slots[ticket.slot];
        if slot.host_sequence != Some(ticket.sequence) {
            let read = match &slot.readback {
                Some(readback) => readback
                    .read_into(&self.ctx.device, &mut slot.host_pixels, self.fence_timeout)
                    .map_err(|e| Self::map_failure(ticket.slot, "readback", e)),
                None => Err(FrameError::Mapping {
                    buffer: "readback",
                    reason: "no readback buffer allocated".to_string(),
                }),
            };
            if let Err(err) = read {
                return Err(self.escalate(err));
            }
            slot.host_sequence = Some(ticket.sequence);
        }

        let slot = &self.slots[ticket.slot];
        Ok(OutputImage::Host {
            pixels: &slot.host_pixels,
            resolution: self.resolution,
        })
    }

    fn release(&mut self, ticket: FrameTicket) -> FrameResult<()> {
        self.ring.release(ticket)
    }

    fn reset(&mut self) -> FrameResult<()> {
        self.ctx.poll();
        self.check_device()?;
        let dropped = self.ring.reset();
        for slot in &mut self.slots {
            slot.reallocate_transfer_buffers(&self.ctx)
                .map_err(FrameError::ResetFailed)?;
        }
        self.stats.resets += 1;
        log::warn!("compute engine reset, {dropped} in-flight frame(s) dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;

    fn engine(width: u32, height: u32, slots: usize) -> ComputeEngine {
        let ctx = Arc::new(DeviceContext::initialize(&DeviceConfig::default()).expect("GPU device"));
        let config = EngineConfig {
            width,
            height,
            slots,
            ..EngineConfig::default()
        };
        ComputeEngine::new(ctx, &config).expect("engine")
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_images_match_resolution() {
        let engine = engine(100, 30, 2);
        for slot in 0..engine.slot_count() {
            let res = engine.slot_resources(slot).unwrap();
            assert_eq!(res.input.texture.width(), 100);
            assert_eq!(res.output.texture.height(), 30);
            assert!(res.staging.size() >= 100 * 30 * 4);
        }
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_size_mismatch_keeps_slots_idle() {
        let mut engine = engine(64, 64, 2);
        let frame = Frame::packed(64, 64, vec![0; 100]);
        let err = engine.process_frame(&frame, 8).unwrap_err();
        assert!(matches!(err, FrameError::SizeMismatch { .. }));
        assert!(engine.is_idle());
        assert_eq!(engine.stats().submitted, 0);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_zero_slots_rejected() {
        let ctx = Arc::new(DeviceContext::initialize(&DeviceConfig::default()).expect("GPU device"));
        let config = EngineConfig {
            slots: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            ComputeEngine::new(ctx, &config),
            Err(GpuError::InvalidConfiguration(_))
        ));
    }
}
