/// Implements [`Allocator`](super::Allocator) on top of [`gpu_allocator`]
use std::ffi::c_void;
use std::fmt::{Debug, Formatter};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan;

use crate::StagehandError;

#[derive(Clone)]
pub struct GpuAllocator {
    handle: Arc<Mutex<vulkan::Allocator>>,
}

impl Debug for GpuAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuAllocator").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct GpuAllocation {
    handle: vulkan::Allocation,
    name: String,
}

impl GpuAllocator {
    pub fn new(desc: &vulkan::AllocatorCreateDesc) -> Result<Self> {
        let allocator = vulkan::Allocator::new(desc)?;
        Ok(Self {
            handle: Arc::new(Mutex::new(allocator)),
        })
    }
}

impl super::Allocator for GpuAllocator {
    type Allocation = GpuAllocation;

    fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        location: super::MemoryLocation,
        linear: bool,
    ) -> Result<GpuAllocation> {
        let handle = self
            .handle
            .lock()
            .map_err(|_| StagehandError::PoisonError)?
            .allocate(&vulkan::AllocationCreateDesc {
                name,
                requirements: *requirements,
                location: location.into(),
                linear,
                allocation_scheme: vulkan::AllocationScheme::GpuAllocatorManaged,
            })?;

        #[cfg(feature = "log-memory-allocations")]
        tracing::trace!(
            "Allocated {name} ({} bytes, {:?})",
            requirements.size,
            location
        );

        Ok(GpuAllocation {
            handle,
            name: name.to_string(),
        })
    }

    fn free(&self, allocation: Self::Allocation) -> Result<()> {
        #[cfg(feature = "log-memory-allocations")]
        tracing::trace!("Freeing {}", allocation.name);

        self.handle
            .lock()
            .map_err(|_| StagehandError::PoisonError)?
            .free(allocation.handle)?;
        Ok(())
    }
}

impl super::Allocation for GpuAllocation {
    fn memory(&self) -> vk::DeviceMemory {
        unsafe { self.handle.memory() }
    }

    fn offset(&self) -> vk::DeviceSize {
        self.handle.offset()
    }

    fn size(&self) -> vk::DeviceSize {
        self.handle.size()
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.handle.mapped_ptr()
    }

    fn is_coherent(&self) -> bool {
        self.handle
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
