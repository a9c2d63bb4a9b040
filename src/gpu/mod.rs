//! GPU device layer built on wgpu.
//!
//! - [`context`]: adapter selection, logical device, queue, submission
//! - [`memory`]: memory-type table and resolver
//! - [`fence`]: completion fences with bounded waits
//! - [`image`]: storage images, staging and readback buffers
//! - [`kernel`]: pixelation kernel loading and pipeline

pub mod context;
pub mod fence;
pub mod image;
pub mod kernel;
pub mod memory;

pub use context::{dispatch_size, AdapterInfo, DeviceContext};
pub use fence::{Fence, FenceTimeout};
pub use image::{GpuImage, ReadbackBuffer, StagingBuffer, IMAGE_FORMAT};
pub use kernel::{KernelSource, PixelateKernel, PixelateParams, TILE_SIZE};
pub use memory::{MemoryProperties, MemoryTypeTable, ResourceKind};
