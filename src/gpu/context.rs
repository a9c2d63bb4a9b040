//! Device context: adapter selection, logical device, queue and memory types.
//!
//! ADAPTER SELECTION:
//! Adapters are enumerated explicitly instead of going through wgpu's power
//! preference heuristics, which happily return llvmpipe on headless Linux
//! boxes. Hardware GPUs are ranked first; CPU/software adapters are only
//! taken when the configuration allows it.
//!
//! REQUIRED CAPABILITIES:
//! The pixelation kernel reads its input through a read-only `rgba8unorm`
//! storage image and receives the block size as a push constant. Both need
//! native-only features, so adapters without them fail startup.

use crate::core::config::DeviceConfig;
use crate::core::error::{GpuError, GpuResult};
use crate::core::types::Resolution;
use crate::gpu::fence::Fence;
use crate::gpu::image::IMAGE_FORMAT;
use crate::gpu::kernel::{PUSH_CONSTANT_BYTES, TILE_SIZE};
use crate::gpu::memory::{MemoryProperties, MemoryTypeTable};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Features every device must expose.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::PUSH_CONSTANTS | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
}

/// Texture usages the INPUT/OUTPUT images need from [`IMAGE_FORMAT`].
pub fn required_image_usages() -> wgpu::TextureUsages {
    wgpu::TextureUsages::STORAGE_BINDING
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    pub driver: String,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
            driver: info.driver,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Rank an adapter type; lower is better, `None` means never pick it.
fn adapter_rank(device_type: wgpu::DeviceType, allow_software: bool) -> Option<u8> {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => Some(0),
        wgpu::DeviceType::IntegratedGpu => Some(1),
        wgpu::DeviceType::VirtualGpu => Some(2),
        wgpu::DeviceType::Other => Some(3),
        wgpu::DeviceType::Cpu if allow_software => Some(4),
        wgpu::DeviceType::Cpu => None,
    }
}

/// Index of the best adapter among `types`, first one winning ties.
pub fn select_adapter(types: &[wgpu::DeviceType], allow_software: bool) -> Option<usize> {
    types
        .iter()
        .enumerate()
        .filter_map(|(i, t)| adapter_rank(*t, allow_software).map(|rank| (rank, i)))
        .min()
        .map(|(_, i)| i)
}

/// The GPU logical device, its compute queue and memory-type resolver.
///
/// Hold one `DeviceContext` for the lifetime of the application and share
/// it through an `Arc`.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the instance outlives `device` and `queue`.
pub struct DeviceContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    limits: wgpu::Limits,
    image_usages: wgpu::TextureUsages,
    memory_types: MemoryTypeTable,
    lost: Arc<AtomicBool>,
    _instance: wgpu::Instance,
}

impl DeviceContext {
    /// Select an adapter and create the logical device and queue.
    ///
    /// # Errors
    /// Fails if no adapter qualifies, the adapter lacks a required feature,
    /// or the device request is refused. All of these are fatal.
    pub fn initialize(config: &DeviceConfig) -> GpuResult<Self> {
        pollster::block_on(Self::init_async(config))
    }

    async fn init_async(config: &DeviceConfig) -> GpuResult<Self> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        for a in &adapters {
            log::debug!("found adapter: {}", AdapterInfo::from(a.get_info()));
        }

        let types: Vec<wgpu::DeviceType> =
            adapters.iter().map(|a| a.get_info().device_type).collect();
        let index = select_adapter(&types, config.allow_software_adapter).ok_or(
            GpuError::NoSuitableAdapter {
                allow_software: config.allow_software_adapter,
            },
        )?;
        let adapter = adapters
            .into_iter()
            .nth(index)
            .ok_or(GpuError::NoSuitableAdapter {
                allow_software: config.allow_software_adapter,
            })?;
        let adapter_info = AdapterInfo::from(adapter.get_info());

        let missing = required_features() - adapter.features();
        if !missing.is_empty() {
            return Err(GpuError::MissingFeatures {
                adapter: adapter_info.name.clone(),
                missing: format!("{missing:?}"),
            });
        }

        let image_usages = adapter
            .get_texture_format_features(IMAGE_FORMAT)
            .allowed_usages;
        if !image_usages.contains(required_image_usages()) {
            return Err(GpuError::UnsupportedFormat {
                format: IMAGE_FORMAT,
                usage: format!("{:?}", required_image_usages()),
            });
        }

        let adapter_limits = adapter.limits();
        let limits = wgpu::Limits {
            max_push_constant_size: PUSH_CONSTANT_BYTES,
            max_texture_dimension_2d: adapter_limits.max_texture_dimension_2d,
            ..wgpu::Limits::default()
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(&config.label),
                    required_features: required_features(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
            lost_flag.store(true, Ordering::Release);
        });
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured GPU error: {err}");
        }));

        let memory_types = MemoryTypeTable::for_device_type(adapter_info.device_type);
        log::info!("GPU device ready: {adapter_info}");

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
            image_usages,
            memory_types,
            lost,
            _instance: instance,
        })
    }

    /// Limits the logical device was created with.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Memory types published by this device.
    pub fn memory_types(&self) -> &MemoryTypeTable {
        &self.memory_types
    }

    /// Resolve a memory category to a concrete memory type index.
    ///
    /// # Errors
    /// [`GpuError::NoCompatibleMemoryType`] if no type matches; this is a
    /// hardware/configuration error, not recoverable at runtime.
    pub fn resolve_memory_type(&self, required_bits: u32, desired: MemoryProperties) -> GpuResult<u32> {
        self.memory_types.resolve(required_bits, desired)
    }

    /// Check that images of `resolution` can be created on this device.
    pub fn validate_resolution(&self, resolution: Resolution) -> GpuResult<()> {
        let max_dimension = self.limits.max_texture_dimension_2d;
        if !resolution.is_valid()
            || resolution.width > max_dimension
            || resolution.height > max_dimension
        {
            return Err(GpuError::UnsupportedResolution {
                resolution,
                max_dimension,
            });
        }
        if !self.image_usages.contains(required_image_usages()) {
            return Err(GpuError::UnsupportedFormat {
                format: IMAGE_FORMAT,
                usage: format!("{:?}", required_image_usages()),
            });
        }
        Ok(())
    }

    /// Start recording a new command sequence.
    pub fn command_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Submit a recorded command sequence to the compute queue.
    ///
    /// When a fence is given it is reset before submission and signaled
    /// once the sequence (and everything submitted before it) completes.
    /// Submission returns immediately; observe completion via the fence.
    pub fn submit(&self, commands: wgpu::CommandBuffer, fence: Option<&Fence>) -> wgpu::SubmissionIndex {
        if let Some(fence) = fence {
            fence.reset();
        }
        let index = self.queue.submit(std::iter::once(commands));
        if let Some(fence) = fence {
            fence.signal_on_completion(&self.queue);
        }
        index
    }

    /// Process completed work and run pending callbacks without blocking.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Poll);
    }

    /// Whether the device-lost callback has fired.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Run a resource-creating closure inside wgpu error scopes.
    ///
    /// Validation and out-of-memory errors raised while `create` runs are
    /// returned as [`GpuError::ResourceCreation`] instead of reaching the
    /// uncaptured-error handler.
    pub fn create_checked<T>(
        &self,
        resource: &'static str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> GpuResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(GpuError::ResourceCreation {
                resource,
                reason: err.to_string(),
            }),
            None => Ok(value),
        }
    }

    /// Workgroups needed to cover an image with [`TILE_SIZE`] tiles.
    pub fn dispatch_size(&self, resolution: Resolution) -> (u32, u32) {
        dispatch_size(resolution)
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceContext {{ adapter: {}, max 2D texture: {} }}",
            self.adapter_info, self.limits.max_texture_dimension_2d
        )
    }
}

/// Workgroups needed to cover `resolution`, using ceiling division so
/// partial tiles at the right and bottom edges are dispatched too.
pub fn dispatch_size(resolution: Resolution) -> (u32, u32) {
    (
        resolution.width.div_ceil(TILE_SIZE),
        resolution.height.div_ceil(TILE_SIZE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::DeviceType;

    #[test]
    fn test_select_prefers_discrete() {
        let types = [DeviceType::IntegratedGpu, DeviceType::Cpu, DeviceType::DiscreteGpu];
        assert_eq!(select_adapter(&types, false), Some(2));
    }

    #[test]
    fn test_select_rejects_software_by_default() {
        let types = [DeviceType::Cpu];
        assert_eq!(select_adapter(&types, false), None);
        assert_eq!(select_adapter(&types, true), Some(0));
    }

    #[test]
    fn test_select_first_wins_ties() {
        let types = [DeviceType::Other, DeviceType::IntegratedGpu, DeviceType::IntegratedGpu];
        assert_eq!(select_adapter(&types, false), Some(1));
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select_adapter(&[], true), None);
    }

    #[test]
    fn test_dispatch_size_exact() {
        assert_eq!(dispatch_size(Resolution::new(64, 64)), (4, 4));
        assert_eq!(dispatch_size(Resolution::new(1920, 1088)), (120, 68));
    }

    #[test]
    fn test_dispatch_size_ceiling() {
        assert_eq!(dispatch_size(Resolution::new(1920, 1080)), (120, 68));
        assert_eq!(dispatch_size(Resolution::new(1, 17)), (1, 2));
    }

    #[test]
    fn test_adapter_info_display() {
        let info = AdapterInfo {
            name: "Test GPU".to_string(),
            vendor: 0x10de,
            device: 1,
            device_type: DeviceType::DiscreteGpu,
            backend: wgpu::Backend::Vulkan,
            driver: String::new(),
        };
        assert_eq!(info.to_string(), "Test GPU (Vulkan, DiscreteGpu)");
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_initialize_device() {
        let ctx = DeviceContext::initialize(&DeviceConfig::default()).expect("GPU device");
        assert!(!ctx.is_lost());
        assert!(ctx.validate_resolution(Resolution::new(64, 64)).is_ok());
        assert!(ctx
            .validate_resolution(Resolution::new(ctx.limits().max_texture_dimension_2d + 1, 1))
            .is_err());
    }
}
