use anyhow::Result;
use ash::vk;
/// Provides traits for implementing allocators
use std::ffi::c_void;
use std::fmt::Debug;
use std::ptr::NonNull;

#[cfg(feature = "vulkan")]
pub mod gpu_allocator_impl;
#[cfg(feature = "vulkan")]
pub use gpu_allocator_impl::*;

pub mod memory_location;

pub use memory_location::*;

/// Expectation of an allocator.
///
/// Implementations must already be thread-safe: callers never lock around these calls.
pub trait Allocator: Clone + Send + Sync + 'static {
    type Allocation: Allocation;

    /// Create a new allocation
    fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Self::Allocation>;

    /// Free an allocation
    fn free(&self, allocation: Self::Allocation) -> Result<()>;
}

pub trait Allocation: Debug + Send + Sync + 'static {
    /// Get the underlying [`vk::DeviceMemory`]
    fn memory(&self) -> vk::DeviceMemory;

    /// Get the offset of the allocation inside [`Self::memory`]
    fn offset(&self) -> vk::DeviceSize;

    /// Size of the allocation in bytes
    fn size(&self) -> vk::DeviceSize;

    /// Get the raw ptr that underlies the allocation, [`None`] if the memory is not host visible
    fn mapped_ptr(&self) -> Option<NonNull<c_void>>;

    /// Host writes are visible to the device without an explicit flush
    fn is_coherent(&self) -> bool;

    /// Get name of the allocation
    fn name(&self) -> &str;
}
