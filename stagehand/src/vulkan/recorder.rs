use ash::vk;

use crate::device::{BufferBarrier, ImageBarrier, TransferRecorder};

/// A primary command buffer in the recording state.
///
/// Every recorder owns the transient pool its command buffer came from. Whoever holds the
/// recorder is the only one touching that pool, which is all the external synchronization Vulkan
/// asks for.
pub struct VulkanRecorder {
    pub(crate) device: ash::Device,
    pub(crate) pool: vk::CommandPool,
    pub(crate) handle: vk::CommandBuffer,
}

impl std::fmt::Debug for VulkanRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRecorder")
            .field("pool", &self.pool)
            .field("handle", &self.handle)
            .finish()
    }
}

impl VulkanRecorder {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }
}

impl TransferRecorder for VulkanRecorder {
    fn pipeline_barrier(&mut self, buffers: &[BufferBarrier], images: &[ImageBarrier]) {
        let buffer_barriers: Vec<vk::BufferMemoryBarrier2> =
            buffers.iter().copied().map(Into::into).collect();
        let image_barriers: Vec<vk::ImageMemoryBarrier2> =
            images.iter().copied().map(Into::into).collect();
        unsafe {
            self.device.cmd_pipeline_barrier2(
                self.handle,
                &vk::DependencyInfo::default()
                    .buffer_memory_barriers(&buffer_barriers)
                    .image_memory_barriers(&image_barriers),
            );
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.handle, src, dst, regions);
        }
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.handle, src, dst, dst_layout, regions);
        }
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.handle, src, src_layout, dst, regions);
        }
    }
}
