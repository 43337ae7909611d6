/// Memory classes a resource can request from an [`Allocator`](super::Allocator)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Memory useful in device accessible memory
    #[default]
    GpuOnly,
    /// Memory useful for uploading data to the device
    CpuToGpu,
    /// Memory useful for read back of data
    GpuToCpu,
    /// Memory that is restricted to the host
    CpuOnly,
}

impl MemoryLocation {
    /// Whether the host can map memory of this class
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

#[cfg(feature = "vulkan")]
impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryLocation) -> Self {
        match value {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
            // gpu-allocator has no host-only heap; upload memory is the closest match
            MemoryLocation::CpuOnly => gpu_allocator::MemoryLocation::CpuToGpu,
        }
    }
}
