use anyhow::Result;
use ash::vk;

use crate::allocators::{Allocation, Allocator};
use crate::resource::{ImageDescriptor, SamplerDescriptor};

pub mod barrier;
pub mod queue;

pub use barrier::*;
pub use queue::QueueInfo;

/// Allocation type handed out by an allocator
pub type AllocationOf<A> = <A as Allocator>::Allocation;

/// Allocation type handed out by a device's allocator
pub type DeviceAllocation<D> = AllocationOf<<D as Device>::Allocator>;

/// A range of bound device memory the host has mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedRange {
    pub memory: vk::DeviceMemory,
    /// Offset from the start of [`Self::memory`]
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl MappedRange {
    /// Range relative to the start of an allocation
    pub fn within<A: Allocation>(
        allocation: &A,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Self {
        Self {
            memory: allocation.memory(),
            offset: allocation.offset() + offset,
            size,
        }
    }
}

/// Everything the resource manager needs from the device and its transfer queue.
///
/// The queue is fetched once when the device is built and treated as read-only configuration.
/// Implementations must be safe to call from many threads at once.
pub trait Device: Send + Sync + 'static {
    type Allocator: Allocator;
    type Recorder: TransferRecorder;
    /// An in-flight submission that can be waited on
    type Submission: Send;

    fn queue_info(&self) -> QueueInfo;

    fn allocator(&self) -> &Self::Allocator;

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags)
        -> Result<vk::Buffer>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> Result<vk::MemoryRequirements>;

    fn bind_buffer_memory(&self, buffer: vk::Buffer, allocation: &AllocationOf<Self::Allocator>)
        -> Result<()>;

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<vk::BufferView>;

    fn destroy_buffer_view(&self, view: vk::BufferView);

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
        initial_layout: vk::ImageLayout,
    ) -> Result<vk::Image>;

    fn destroy_image(&self, image: vk::Image);

    fn image_memory_requirements(&self, image: vk::Image) -> Result<vk::MemoryRequirements>;

    fn bind_image_memory(&self, image: vk::Image, allocation: &AllocationOf<Self::Allocator>)
        -> Result<()>;

    /// Host layout of one subresource of a linearly tiled image
    fn image_subresource_layout(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<vk::SubresourceLayout>;

    fn create_image_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView>;

    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<vk::Sampler>;

    fn destroy_sampler(&self, sampler: vk::Sampler);

    /// Make host writes to non-coherent memory visible to the device
    fn flush_mapped_range(&self, range: MappedRange) -> Result<()>;

    /// Make device writes to non-coherent memory visible to the host
    fn invalidate_mapped_range(&self, range: MappedRange) -> Result<()>;

    /// Start a fresh command sequence on the transfer queue.
    ///
    /// Recorders share nothing that needs external synchronization, whoever holds one may record
    /// into it while other threads record into theirs.
    fn begin_recording(&self) -> Result<Self::Recorder>;

    /// Throw away a command sequence without submitting it
    fn discard_recording(&self, recorder: Self::Recorder);

    fn submit(&self, recorder: Self::Recorder) -> Result<Self::Submission>;

    /// Block until the submission has executed, `timeout` is in nanoseconds
    fn wait(&self, submission: Self::Submission, timeout: u64) -> Result<()>;

    /// Block until the transfer queue has drained
    fn wait_idle(&self) -> Result<()>;
}
