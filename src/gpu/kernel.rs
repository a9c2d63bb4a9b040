//! The pixelation kernel: artifact loading, binding layout and pipeline.
//!
//! Kernel contract, whatever the artifact format:
//! - entry point `main`, workgroup size `16 × 16 × 1`
//! - group 0, binding 0: read-only `rgba8unorm` storage image (input)
//! - group 0, binding 1: write-only `rgba8unorm` storage image (output)
//! - one 4-byte push constant, `block_size: u32`
//!
//! The built-in WGSL kernel samples the top-left pixel of each block.

use crate::core::error::{GpuError, GpuResult};
use crate::gpu::context::DeviceContext;
use crate::gpu::image::{GpuImage, IMAGE_FORMAT};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Workgroup edge length; each workgroup covers a `TILE_SIZE²` tile.
pub const TILE_SIZE: u32 = 16;

/// Size of the push-constant block.
pub const PUSH_CONSTANT_BYTES: u32 = std::mem::size_of::<PixelateParams>() as u32;

/// Kernel entry point name.
pub const ENTRY_POINT: &str = "main";

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Embedded WGSL source of the built-in kernel.
pub const BUILTIN_WGSL: &str = include_str!("shaders/pixelate.wgsl");

/// Scalar parameters pushed with every dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PixelateParams {
    /// Edge length of one pixelation block, at least 1
    pub block_size: u32,
}

/// Where the kernel comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// The embedded WGSL kernel
    Builtin,
    /// WGSL text loaded from a file
    Wgsl { path: PathBuf, source: String },
    /// A precompiled SPIR-V binary
    SpirV { path: PathBuf, words: Vec<u32> },
}

impl KernelSource {
    /// Load the artifact at `path`, or the built-in kernel when `None`.
    ///
    /// Files ending in `.wgsl` are read as WGSL text, anything else as a
    /// SPIR-V binary.
    pub fn load(path: Option<&Path>) -> GpuResult<Self> {
        let Some(path) = path else {
            return Ok(KernelSource::Builtin);
        };
        let load_err = |reason: String| GpuError::KernelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let is_wgsl = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"));
        if is_wgsl {
            let source = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
            return Ok(KernelSource::Wgsl {
                path: path.to_path_buf(),
                source,
            });
        }
        let bytes = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
        let words = parse_spirv(&bytes).map_err(load_err)?;
        Ok(KernelSource::SpirV {
            path: path.to_path_buf(),
            words,
        })
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            KernelSource::Builtin => "built-in WGSL".to_string(),
            KernelSource::Wgsl { path, .. } => format!("WGSL {}", path.display()),
            KernelSource::SpirV { path, words } => {
                format!("SPIR-V {} ({} words)", path.display(), words.len())
            }
        }
    }

    fn shader_source(&self) -> wgpu::ShaderSource<'_> {
        match self {
            KernelSource::Builtin => wgpu::ShaderSource::Wgsl(Cow::Borrowed(BUILTIN_WGSL)),
            KernelSource::Wgsl { source, .. } => wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.as_str())),
            KernelSource::SpirV { words, .. } => wgpu::ShaderSource::SpirV(Cow::Borrowed(words.as_slice())),
        }
    }
}

/// Decode a SPIR-V binary into words.
///
/// Accepts either byte order, detected from the magic number.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!(
            "SPIR-V length must be a non-zero multiple of 4, got {} bytes",
            bytes.len()
        ));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    match words[0] {
        SPIRV_MAGIC => Ok(words),
        w if w.swap_bytes() == SPIRV_MAGIC => Ok(words.into_iter().map(u32::swap_bytes).collect()),
        w => Err(format!("bad SPIR-V magic {w:#010x}")),
    }
}

/// The compiled pixelation pipeline and its binding layout.
pub struct PixelateKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl PixelateKernel {
    /// Compile `source` and build the pipeline against the fixed binding
    /// layout.
    pub fn new(ctx: &DeviceContext, source: &KernelSource) -> GpuResult<Self> {
        log::debug!("compiling pixelation kernel ({})", source.describe());

        let bind_group_layout = ctx.create_checked("kernel bind group layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pixelate::bind_group_layout"),
                entries: &[
                    storage_image_entry(0, wgpu::StorageTextureAccess::ReadOnly),
                    storage_image_entry(1, wgpu::StorageTextureAccess::WriteOnly),
                ],
            })
        })?;

        let pipeline_layout = ctx.create_checked("kernel pipeline layout", |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pixelate::pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::COMPUTE,
                    range: 0..PUSH_CONSTANT_BYTES,
                }],
            })
        })?;

        let compile_err = |e: GpuError| GpuError::KernelCompile(e.to_string());
        let module = ctx
            .create_checked("kernel module", |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("pixelate"),
                    source: source.shader_source(),
                })
            })
            .map_err(compile_err)?;

        let pipeline = ctx
            .create_checked("kernel pipeline", |device| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("pixelate::pipeline"),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
            .map_err(compile_err)?;

        Ok(Self {
            pipeline,
            bind_group_layout,
        })
    }

    /// Build a descriptor binding set wiring `input` and `output` to
    /// bindings 0 and 1.
    pub fn bind_group(
        &self,
        ctx: &DeviceContext,
        label: &'static str,
        input: &GpuImage,
        output: &GpuImage,
    ) -> GpuResult<wgpu::BindGroup> {
        ctx.create_checked(label, |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&input.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&output.view),
                    },
                ],
            })
        })
    }

    /// Record one dispatch covering `workgroups` tiles.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        params: PixelateParams,
        workgroups: (u32, u32),
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("pixelate"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_push_constants(0, bytemuck::bytes_of(&params));
        pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
    }
}

fn storage_image_entry(binding: u32, access: wgpu::StorageTextureAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format: IMAGE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_push_constant_size() {
        assert_eq!(PUSH_CONSTANT_BYTES, 4);
        let params = PixelateParams { block_size: 8 };
        assert_eq!(bytemuck::bytes_of(&params), &8u32.to_ne_bytes());
    }

    #[test]
    fn test_builtin_kernel_declares_contract() {
        assert!(BUILTIN_WGSL.contains("@workgroup_size(16, 16, 1)"));
        assert!(BUILTIN_WGSL.contains("fn main("));
        assert!(BUILTIN_WGSL.contains("@binding(0)"));
        assert!(BUILTIN_WGSL.contains("@binding(1)"));
        assert!(BUILTIN_WGSL.contains("var<push_constant>"));
    }

    #[test]
    fn test_parse_spirv_little_endian() {
        let words = parse_spirv(&spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7])).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7]);
    }

    #[test]
    fn test_parse_spirv_big_endian() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 5].iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(parse_spirv(&bytes).unwrap(), vec![SPIRV_MAGIC, 5]);
    }

    #[test]
    fn test_parse_spirv_rejects_bad_input() {
        assert!(parse_spirv(&[]).is_err());
        assert!(parse_spirv(&[0x03, 0x02, 0x23]).is_err());
        assert!(parse_spirv(&spirv_bytes(&[0xdead_beef])).is_err());
    }

    #[test]
    fn test_load_defaults_to_builtin() {
        assert_eq!(KernelSource::load(None).unwrap(), KernelSource::Builtin);
    }

    #[test]
    fn test_load_wgsl_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".wgsl").tempfile().unwrap();
        file.write_all(BUILTIN_WGSL.as_bytes()).unwrap();
        let source = KernelSource::load(Some(file.path())).unwrap();
        assert!(matches!(source, KernelSource::Wgsl { .. }));
    }

    #[test]
    fn test_load_spirv_artifact() {
        let mut file = tempfile::Builder::new().suffix(".spv").tempfile().unwrap();
        file.write_all(&spirv_bytes(&[SPIRV_MAGIC, 0x0001_0300])).unwrap();
        let source = KernelSource::load(Some(file.path())).unwrap();
        assert!(matches!(source, KernelSource::SpirV { ref words, .. } if words.len() == 2));
    }

    #[test]
    fn test_load_missing_artifact() {
        let err = KernelSource::load(Some(Path::new("/nonexistent/pixelate.spv"))).unwrap_err();
        assert!(matches!(err, GpuError::KernelLoad { .. }));
    }
}
