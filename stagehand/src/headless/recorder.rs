use ash::vk;

use crate::device::{BufferBarrier, ImageBarrier, TransferRecorder};

/// A command as recorded, kept verbatim for execution and inspection
#[derive(Debug, Clone)]
pub enum HeadlessCommand {
    Barrier {
        buffers: Vec<BufferBarrier>,
        images: Vec<ImageBarrier>,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
}

#[derive(Debug)]
pub struct HeadlessRecorder {
    /// Pool owned by this recording alone
    pub(crate) pool: vk::CommandPool,
    pub(crate) commands: Vec<HeadlessCommand>,
}

impl HeadlessRecorder {
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }
}

impl TransferRecorder for HeadlessRecorder {
    fn pipeline_barrier(&mut self, buffers: &[BufferBarrier], images: &[ImageBarrier]) {
        self.commands.push(HeadlessCommand::Barrier {
            buffers: buffers.to_vec(),
            images: images.to_vec(),
        });
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.commands.push(HeadlessCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(HeadlessCommand::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(HeadlessCommand::CopyImageToBuffer {
            src,
            src_layout,
            dst,
            regions: regions.to_vec(),
        });
    }
}
