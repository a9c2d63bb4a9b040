//! Memory-type resolution.
//!
//! wgpu does not expose raw memory heaps, but every resource still lands in
//! one of a few memory categories: device-local image memory, host-visible
//! upload memory, and host-visible readback memory. The [`MemoryTypeTable`]
//! publishes those categories as indexed memory types, each bound to the
//! allocation strategy (wgpu usage flags) that produces it, and
//! [`MemoryTypeTable::resolve`] picks the first type compatible with a
//! resource's requirements.

use crate::core::error::GpuError;
use std::fmt;
use std::ops::BitOr;

/// Property flags of a memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryProperties(u32);

impl MemoryProperties {
    /// No properties.
    pub const NONE: Self = Self(0);
    /// Fastest memory for device access.
    pub const DEVICE_LOCAL: Self = Self(1 << 0);
    /// Mappable by the host.
    pub const HOST_VISIBLE: Self = Self(1 << 1);
    /// Host writes are visible to the device without explicit flushes.
    pub const HOST_COHERENT: Self = Self(1 << 2);
    /// Host reads are cached.
    pub const HOST_CACHED: Self = Self(1 << 3);

    /// Whether every flag in `other` is also set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for MemoryProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for MemoryProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::DEVICE_LOCAL, "DEVICE_LOCAL"),
            (Self::HOST_VISIBLE, "HOST_VISIBLE"),
            (Self::HOST_COHERENT, "HOST_COHERENT"),
            (Self::HOST_CACHED, "HOST_CACHED"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&set.join(" | "))
        }
    }
}

/// How a memory type is realized through wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Device-resident storage image (texture).
    DeviceImage,
    /// Host-writable buffer that feeds transfers (`MAP_WRITE | COPY_SRC`).
    UploadBuffer,
    /// Host-readable buffer that receives transfers (`MAP_READ | COPY_DST`).
    ReadbackBuffer,
}

impl AllocationStrategy {
    /// Buffer usages for buffer strategies, `None` for images.
    pub fn buffer_usages(self) -> Option<wgpu::BufferUsages> {
        match self {
            AllocationStrategy::DeviceImage => None,
            AllocationStrategy::UploadBuffer => {
                Some(wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC)
            }
            AllocationStrategy::ReadbackBuffer => {
                Some(wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST)
            }
        }
    }
}

/// The kinds of resource the compute engine allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// INPUT or OUTPUT storage image
    StorageImage,
    /// Staging buffer for host → device transfer
    Staging,
    /// Buffer for device → host transfer
    Readback,
}

impl ResourceKind {
    /// Memory properties this kind of resource asks for.
    pub fn desired_properties(self) -> MemoryProperties {
        match self {
            ResourceKind::StorageImage => MemoryProperties::DEVICE_LOCAL,
            ResourceKind::Staging => MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            ResourceKind::Readback => MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        }
    }

    fn strategy(self) -> AllocationStrategy {
        match self {
            ResourceKind::StorageImage => AllocationStrategy::DeviceImage,
            ResourceKind::Staging => AllocationStrategy::UploadBuffer,
            ResourceKind::Readback => AllocationStrategy::ReadbackBuffer,
        }
    }
}

/// One entry in the memory-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Property flags
    pub properties: MemoryProperties,
    /// How the type is allocated
    pub strategy: AllocationStrategy,
}

/// Indexed memory types available on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTypeTable {
    types: Vec<MemoryType>,
}

impl MemoryTypeTable {
    /// Build the table for an adapter.
    ///
    /// On unified-memory adapters (integrated GPUs, software rasterizers)
    /// device-local memory is also host visible.
    pub fn for_device_type(device_type: wgpu::DeviceType) -> Self {
        let unified = matches!(
            device_type,
            wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu
        );
        let device_local = if unified {
            MemoryProperties::DEVICE_LOCAL
                | MemoryProperties::HOST_VISIBLE
                | MemoryProperties::HOST_COHERENT
        } else {
            MemoryProperties::DEVICE_LOCAL
        };
        Self::from_types(vec![
            MemoryType {
                properties: device_local,
                strategy: AllocationStrategy::DeviceImage,
            },
            MemoryType {
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
                strategy: AllocationStrategy::UploadBuffer,
            },
            MemoryType {
                properties: MemoryProperties::HOST_VISIBLE
                    | MemoryProperties::HOST_COHERENT
                    | MemoryProperties::HOST_CACHED,
                strategy: AllocationStrategy::ReadbackBuffer,
            },
        ])
    }

    /// Build a table from explicit entries.
    pub fn from_types(types: Vec<MemoryType>) -> Self {
        Self { types }
    }

    /// All memory types, in index order.
    pub fn types(&self) -> &[MemoryType] {
        &self.types
    }

    /// Memory type at `index`.
    pub fn get(&self, index: u32) -> Option<&MemoryType> {
        self.types.get(index as usize)
    }

    /// Bitmask of memory types a resource kind can live in.
    pub fn requirement_bits(&self, kind: ResourceKind) -> u32 {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, t)| t.strategy == kind.strategy())
            .fold(0, |bits, (i, _)| bits | (1 << i))
    }

    /// Return the first memory type index whose bit is set in
    /// `required_bits` and whose properties contain `desired`.
    pub fn resolve(&self, required_bits: u32, desired: MemoryProperties) -> Result<u32, GpuError> {
        self.types
            .iter()
            .enumerate()
            .find(|(i, t)| *i < 32 && required_bits & (1 << i) != 0 && t.properties.contains(desired))
            .map(|(i, _)| i as u32)
            .ok_or(GpuError::NoCompatibleMemoryType {
                required_bits,
                desired: desired.to_string(),
            })
    }

    /// Resolve the memory type for a resource kind.
    pub fn resolve_for(&self, kind: ResourceKind) -> Result<(u32, MemoryType), GpuError> {
        let index = self.resolve(self.requirement_bits(kind), kind.desired_properties())?;
        // resolve only returns indices present in the table
        let memory_type = self.types[index as usize];
        Ok((index, memory_type))
    }
}
