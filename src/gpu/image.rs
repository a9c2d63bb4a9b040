//! GPU image resources and the host transfer buffers that feed them.
//!
//! THE ROW ALIGNMENT PROBLEM
//! wgpu requires `bytes_per_row` of a buffer↔texture copy to be a multiple
//! of 256. A 1920-wide RGBA8 row is 7680 bytes (aligned), but a 100-wide row
//! is 400 bytes (not). Staging and readback buffers therefore use padded
//! rows of `align_to(width * 4, 256)` bytes; the host side compacts or
//! expands rows on every transfer.
//!
//! MAPPING
//! Staging buffers are `MAP_WRITE | COPY_SRC` and readback buffers are
//! `MAP_READ | COPY_DST`; wgpu forbids combining both on one buffer. Both
//! are mapped through [`map_blocking`], which polls the device and gives up
//! after a bounded timeout instead of waiting forever.

use crate::core::error::{GpuError, GpuResult};
use crate::core::types::{copy_rows, Frame, Resolution};
use crate::gpu::context::{required_image_usages, DeviceContext};
use crate::gpu::memory::{MemoryType, ResourceKind};
use crossbeam::channel::{self, TryRecvError};
use std::time::{Duration, Instant};

/// Pixel format of every INPUT and OUTPUT image.
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Required alignment of `bytes_per_row` in buffer↔texture copies.
pub const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

const MAP_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Bytes per row in staging/readback buffers for `resolution`.
pub fn padded_row_bytes(resolution: Resolution) -> u32 {
    align_to(resolution.row_bytes(), COPY_ALIGNMENT)
}

fn extent(resolution: Resolution) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: resolution.width,
        height: resolution.height,
        depth_or_array_layers: 1,
    }
}

// ============================================================================
// Buffer mapping
// ============================================================================

/// Why a buffer could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The map callback did not fire in time
    Timeout(Duration),
    /// wgpu reported a mapping failure
    Failed(String),
}

/// Map the whole of `buffer`, polling `device` until the map completes or
/// `timeout` elapses. A timed-out request is aborted with `unmap`.
pub fn map_blocking(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    mode: wgpu::MapMode,
    timeout: Duration,
) -> Result<(), MapError> {
    let (sender, receiver) = channel::bounded(1);
    buffer.slice(..).map_async(mode, move |result| {
        // The receiver is gone only if the wait already gave up.
        let _ = sender.send(result);
    });

    let start = Instant::now();
    loop {
        device.poll(wgpu::Maintain::Poll);
        match receiver.try_recv() {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => return Err(MapError::Failed(err.to_string())),
            Err(TryRecvError::Disconnected) => {
                return Err(MapError::Failed("map callback dropped".to_string()))
            }
            Err(TryRecvError::Empty) => {}
        }
        if start.elapsed() >= timeout {
            buffer.unmap();
            return Err(MapError::Timeout(timeout));
        }
        std::thread::sleep(MAP_POLL_INTERVAL);
    }
}

// ============================================================================
// GpuImage
// ============================================================================

/// A device-resident RGBA8 storage image.
///
/// Usable as a kernel storage binding and as both ends of a transfer.
/// Created once at engine initialization and never resized.
pub struct GpuImage {
    pub texture: wgpu::Texture,
    /// Full-texture view bound into descriptor binding sets.
    pub view: wgpu::TextureView,
    pub resolution: Resolution,
    /// Index into the device's memory-type table.
    pub memory_type: u32,
}

impl GpuImage {
    /// Allocate an image in device-local memory.
    pub fn new(ctx: &DeviceContext, label: &'static str, resolution: Resolution) -> GpuResult<Self> {
        let (memory_type, _) = ctx.memory_types().resolve_for(ResourceKind::StorageImage)?;
        let texture = ctx.create_checked(label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(resolution),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: IMAGE_FORMAT,
                usage: required_image_usages(),
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            resolution,
            memory_type,
        })
    }

    fn copy_target(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

/// Create a host-visible buffer for `kind`, using the usages of the memory
/// type the table resolves it to.
fn create_host_buffer(
    ctx: &DeviceContext,
    label: &'static str,
    kind: ResourceKind,
    size: u64,
    mapped_at_creation: bool,
) -> GpuResult<(wgpu::Buffer, u32)> {
    let (index, MemoryType { strategy, .. }) = ctx.memory_types().resolve_for(kind)?;
    let usage = strategy.buffer_usages().ok_or_else(|| {
        GpuError::InvalidConfiguration(format!("memory type {index} cannot back a buffer"))
    })?;
    let buffer = ctx.create_checked(label, |device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation,
        })
    })?;
    Ok((buffer, index))
}

// ============================================================================
// StagingBuffer
// ============================================================================

/// Host-visible, host-coherent buffer holding one padded RGBA8 frame.
///
/// Created mapped. Each upload writes the frame into the mapped range and
/// unmaps before submission; the next upload re-maps it, which completes
/// only once the device has finished reading the previous contents.
pub struct StagingBuffer {
    pub buffer: wgpu::Buffer,
    pub resolution: Resolution,
    pub padded_row: u32,
    pub memory_type: u32,
    mapped: bool,
}

impl StagingBuffer {
    /// Allocate a staging buffer sized for `resolution`.
    pub fn new(ctx: &DeviceContext, label: &'static str, resolution: Resolution) -> GpuResult<Self> {
        let padded_row = padded_row_bytes(resolution);
        let size = padded_row as u64 * resolution.height as u64;
        let (buffer, memory_type) =
            create_host_buffer(ctx, label, ResourceKind::Staging, size, true)?;
        Ok(Self {
            buffer,
            resolution,
            padded_row,
            memory_type,
            mapped: true,
        })
    }

    /// Byte size of the buffer.
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// Whether the buffer is currently mapped for host writes.
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Copy `frame` into the buffer, honouring its stride, then unmap.
    ///
    /// The frame must already have been checked against the buffer's
    /// resolution.
    pub fn write_frame(
        &mut self,
        device: &wgpu::Device,
        frame: &Frame,
        timeout: Duration,
    ) -> Result<(), MapError> {
        if !self.mapped {
            map_blocking(device, &self.buffer, wgpu::MapMode::Write, timeout)?;
            self.mapped = true;
        }
        {
            let mut range = self.buffer.slice(..).get_mapped_range_mut();
            frame.write_rows_into(&mut range, self.padded_row as usize);
        }
        self.buffer.unmap();
        self.mapped = false;
        Ok(())
    }

    /// Record the staging → image copy.
    pub fn copy_to_image(&self, encoder: &mut wgpu::CommandEncoder, image: &GpuImage) {
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.resolution.height),
                },
            },
            image.copy_target(),
            extent(self.resolution),
        );
    }
}

// ============================================================================
// ReadbackBuffer
// ============================================================================

/// Host-visible buffer receiving the OUTPUT image after the kernel ran.
pub struct ReadbackBuffer {
    pub buffer: wgpu::Buffer,
    pub resolution: Resolution,
    pub padded_row: u32,
    pub memory_type: u32,
}

impl ReadbackBuffer {
    /// Allocate a readback buffer sized for `resolution`.
    pub fn new(ctx: &DeviceContext, label: &'static str, resolution: Resolution) -> GpuResult<Self> {
        let padded_row = padded_row_bytes(resolution);
        let size = padded_row as u64 * resolution.height as u64;
        let (buffer, memory_type) =
            create_host_buffer(ctx, label, ResourceKind::Readback, size, false)?;
        Ok(Self {
            buffer,
            resolution,
            padded_row,
            memory_type,
        })
    }

    /// Record the image → readback copy.
    pub fn copy_from_image(&self, encoder: &mut wgpu::CommandEncoder, image: &GpuImage) {
        encoder.copy_texture_to_buffer(
            image.copy_target(),
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.resolution.height),
                },
            },
            extent(self.resolution),
        );
    }

    /// Map the buffer and copy its rows, padding stripped, into `out`.
    ///
    /// `out` is resized to `width * height * 4` bytes.
    pub fn read_into(
        &self,
        device: &wgpu::Device,
        out: &mut Vec<u8>,
        timeout: Duration,
    ) -> Result<(), MapError> {
        map_blocking(device, &self.buffer, wgpu::MapMode::Read, timeout)?;
        out.resize(self.resolution.frame_bytes(), 0);
        {
            let range = self.buffer.slice(..).get_mapped_range();
            let row_bytes = self.resolution.row_bytes() as usize;
            copy_rows(
                &range,
                self.padded_row as usize,
                out,
                row_bytes,
                row_bytes,
                self.resolution.height as usize,
            );
        }
        self.buffer.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn test_padded_row_bytes() {
        // 64 px * 4 = 256, already aligned
        assert_eq!(padded_row_bytes(Resolution::new(64, 1)), 256);
        // 100 px * 4 = 400 -> 512
        assert_eq!(padded_row_bytes(Resolution::new(100, 1)), 512);
        assert_eq!(padded_row_bytes(Resolution::new(1920, 1080)), 7680);
    }

    #[test]
    fn test_staging_layout_round_trip() {
        // Pack a strided frame into a padded staging layout and strip it
        // again, as upload and readback do.
        let res = Resolution::new(3, 2);
        let padded = padded_row_bytes(res) as usize;
        let frame = Frame::with_stride(
            3,
            2,
            16,
            (0..32u8).collect(),
        );
        let mut staging = vec![0u8; padded * 2];
        frame.write_rows_into(&mut staging, padded);
        assert_eq!(&staging[0..12], &(0..12u8).collect::<Vec<_>>()[..]);
        assert_eq!(&staging[padded..padded + 12], &(16..28u8).collect::<Vec<_>>()[..]);

        let mut packed = vec![0u8; res.frame_bytes()];
        copy_rows(&staging, padded, &mut packed, 12, 12, 2);
        let expected: Vec<u8> = (0..12u8).chain(16..28u8).collect();
        assert_eq!(packed, expected);
    }
}
