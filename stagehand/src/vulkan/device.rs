use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use ash::vk;

use super::recorder::VulkanRecorder;
use crate::allocators::{Allocation, GpuAllocation, GpuAllocator};
use crate::device::{Device, MappedRange, QueueInfo};
use crate::resource::{ImageDescriptor, SamplerDescriptor};
use crate::traits::Destructible;
use crate::util::{align, align_down};

/// Everything needed to drive a transfer queue of an existing logical device
pub struct VulkanDeviceCreateInfo {
    /// The device is borrowed, it is never destroyed by [`VulkanDevice`]
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_info: QueueInfo,
    pub allocator: GpuAllocator,
    /// `VkPhysicalDeviceLimits::nonCoherentAtomSize`
    pub non_coherent_atom_size: vk::DeviceSize,
}

/// A submitted command buffer and the fence signalled when it retires
#[derive(Debug)]
pub struct VulkanSubmission {
    fence: vk::Fence,
    /// Destroying the pool frees the command buffer with it
    pool: vk::CommandPool,
}

pub struct VulkanDevice {
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_info: QueueInfo,
    allocator: GpuAllocator,
    non_coherent_atom_size: vk::DeviceSize,
    /// Submissions whose wait failed, reclaimed once the queue is idle
    abandoned: Mutex<Vec<VulkanSubmission>>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("device", &self.device.handle())
            .field("queue_info", &self.queue_info)
            .finish()
    }
}

impl VulkanDevice {
    pub fn new(create_info: VulkanDeviceCreateInfo) -> Result<Self> {
        anyhow::ensure!(
            create_info.queue_info.supports_transfer(),
            "queue family {} cannot execute transfers",
            create_info.queue_info.family_index
        );
        Ok(Self {
            device: create_info.device,
            queue: Mutex::new(create_info.queue),
            queue_info: create_info.queue_info,
            allocator: create_info.allocator,
            non_coherent_atom_size: create_info.non_coherent_atom_size.max(1),
            abandoned: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let pool = unsafe {
            self.device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(self.queue_info.family_index),
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkCommandPool {:?}", pool);

        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkCommandPool {:?}", pool);

        unsafe {
            self.device.destroy_command_pool(pool, None);
        }
    }

    fn retire(&self, submission: VulkanSubmission) {
        unsafe {
            self.device.destroy_fence(submission.fence, None);
        }
        self.destroy_command_pool(submission.pool);
    }

    /// Widen a range to whole non-coherent atoms
    fn atom_range(&self, range: MappedRange) -> vk::MappedMemoryRange<'static> {
        let offset = align_down(range.offset, self.non_coherent_atom_size);
        let size = if range.size == vk::WHOLE_SIZE {
            vk::WHOLE_SIZE
        } else {
            align(range.offset - offset + range.size, self.non_coherent_atom_size)
        };
        vk::MappedMemoryRange::default()
            .memory(range.memory)
            .offset(offset)
            .size(size)
    }
}

impl Destructible for VulkanDevice {
    fn destroy(&mut self) {
        // retires abandoned submissions along with their pools
        if let Err(error) = self.wait_idle() {
            tracing::error!("Transfer queue did not drain before destroying the device: {error:#}");
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Device for VulkanDevice {
    type Allocator = GpuAllocator;
    type Recorder = VulkanRecorder;
    type Submission = VulkanSubmission;

    fn queue_info(&self) -> QueueInfo {
        self.queue_info
    }

    fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        let buffer = unsafe {
            self.device.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkBuffer {:?}", buffer);

        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkBuffer {:?}", buffer);

        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> Result<vk::MemoryRequirements> {
        Ok(unsafe { self.device.get_buffer_memory_requirements(buffer) })
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, allocation: &GpuAllocation) -> Result<()> {
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?
        };
        Ok(())
    }

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<vk::BufferView> {
        Ok(unsafe {
            self.device.create_buffer_view(
                &vk::BufferViewCreateInfo::default()
                    .buffer(buffer)
                    .format(format)
                    .offset(offset)
                    .range(range),
                None,
            )?
        })
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        unsafe { self.device.destroy_buffer_view(view, None) }
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
        initial_layout: vk::ImageLayout,
    ) -> Result<vk::Image> {
        let image = unsafe {
            self.device.create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(descriptor.image_type)
                    .format(descriptor.format)
                    .extent(descriptor.extent())
                    .mip_levels(descriptor.mip_levels)
                    .array_layers(descriptor.array_layers)
                    .samples(descriptor.samples)
                    .tiling(descriptor.tiling)
                    .usage(descriptor.usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(initial_layout),
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkImage {:?}", image);

        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkImage {:?}", image);

        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> Result<vk::MemoryRequirements> {
        Ok(unsafe { self.device.get_image_memory_requirements(image) })
    }

    fn bind_image_memory(&self, image: vk::Image, allocation: &GpuAllocation) -> Result<()> {
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())?
        };
        Ok(())
    }

    fn image_subresource_layout(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<vk::SubresourceLayout> {
        Ok(unsafe {
            self.device.get_image_subresource_layout(
                image,
                vk::ImageSubresource {
                    aspect_mask: aspect,
                    mip_level,
                    array_layer,
                },
            )
        })
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView> {
        Ok(unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(view_type)
                    .format(format)
                    .subresource_range(subresource_range),
                None,
            )?
        })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<vk::Sampler> {
        let sampler = unsafe {
            self.device.create_sampler(
                &vk::SamplerCreateInfo::default()
                    .mag_filter(descriptor.mag_filter)
                    .min_filter(descriptor.min_filter)
                    .mipmap_mode(descriptor.mipmap_mode)
                    .address_mode_u(descriptor.address_mode_u)
                    .address_mode_v(descriptor.address_mode_v)
                    .address_mode_w(descriptor.address_mode_w)
                    .mip_lod_bias(descriptor.mip_lod_bias)
                    .anisotropy_enable(descriptor.max_anisotropy.is_some())
                    .max_anisotropy(descriptor.max_anisotropy.unwrap_or(1.0))
                    .compare_enable(descriptor.compare_op.is_some())
                    .compare_op(descriptor.compare_op.unwrap_or(vk::CompareOp::ALWAYS))
                    .min_lod(descriptor.min_lod)
                    .max_lod(descriptor.max_lod)
                    .border_color(descriptor.border_color)
                    .unnormalized_coordinates(descriptor.unnormalized_coordinates),
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkSampler {:?}", sampler);

        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkSampler {:?}", sampler);

        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn flush_mapped_range(&self, range: MappedRange) -> Result<()> {
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[self.atom_range(range)])?
        };
        Ok(())
    }

    fn invalidate_mapped_range(&self, range: MappedRange) -> Result<()> {
        unsafe {
            self.device
                .invalidate_mapped_memory_ranges(&[self.atom_range(range)])?
        };
        Ok(())
    }

    fn begin_recording(&self) -> Result<VulkanRecorder> {
        let pool = self.create_command_pool()?;
        let begin = || -> Result<vk::CommandBuffer> {
            let command_buffer = unsafe {
                self.device.allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::default()
                        .command_pool(pool)
                        .level(vk::CommandBufferLevel::PRIMARY)
                        .command_buffer_count(1),
                )?
            }
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no command buffer was allocated"))?;
            unsafe {
                self.device.begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?
            };
            Ok(command_buffer)
        };
        match begin() {
            Ok(handle) => Ok(VulkanRecorder {
                device: self.device.clone(),
                pool,
                handle,
            }),
            Err(error) => {
                self.destroy_command_pool(pool);
                Err(error)
            }
        }
    }

    fn discard_recording(&self, recorder: VulkanRecorder) {
        self.destroy_command_pool(recorder.pool);
    }

    fn submit(&self, recorder: VulkanRecorder) -> Result<VulkanSubmission> {
        let VulkanRecorder {
            pool,
            handle: command_buffer,
            ..
        } = recorder;
        if let Err(error) = unsafe { self.device.end_command_buffer(command_buffer) } {
            self.destroy_command_pool(pool);
            return Err(error.into());
        }
        let fence = match unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        } {
            Ok(fence) => fence,
            Err(error) => {
                self.destroy_command_pool(pool);
                return Err(error.into());
            }
        };
        let submission = VulkanSubmission { fence, pool };

        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let submitted = {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            unsafe {
                self.device.queue_submit2(
                    *queue,
                    &[vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos)],
                    fence,
                )
            }
        };
        match submitted {
            Ok(()) => Ok(submission),
            Err(error) => {
                self.retire(submission);
                Err(error.into())
            }
        }
    }

    fn wait(&self, submission: VulkanSubmission, timeout: u64) -> Result<()> {
        let waited = unsafe {
            self.device
                .wait_for_fences(&[submission.fence], true, timeout)
        };
        match waited {
            Ok(()) => {
                self.retire(submission);
                Ok(())
            }
            Err(error) => {
                // the queue may still own the command buffer
                self.abandoned
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(submission);
                Err(error.into())
            }
        }
    }

    fn wait_idle(&self) -> Result<()> {
        {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            unsafe { self.device.queue_wait_idle(*queue)? };
        }
        let abandoned = std::mem::take(
            &mut *self
                .abandoned
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for submission in abandoned {
            self.retire(submission);
        }
        Ok(())
    }
}
