use ash::vk;

/// A pipeline stage paired with the memory accesses made in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessScope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl AccessScope {
    /// Nothing happened before, used for freshly created resources
    pub const NONE: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);

    pub const TRANSFER_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
    );

    pub const TRANSFER_READ: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
    );

    pub const HOST_READ: Self =
        Self::new(vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_READ);

    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    /// Combine two scopes into one covering both
    pub fn union(self, other: Self) -> Self {
        Self {
            stage: self.stage | other.stage,
            access: self.access | other.access,
        }
    }

    pub fn writes_transfer(&self) -> bool {
        self.access.contains(vk::AccessFlags2::TRANSFER_WRITE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src: AccessScope,
    pub dst: AccessScope,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferBarrier {
    /// Barrier over the entire buffer
    pub fn whole(buffer: vk::Buffer, src: AccessScope, dst: AccessScope) -> Self {
        Self {
            buffer,
            src,
            dst,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

impl From<BufferBarrier> for vk::BufferMemoryBarrier2<'_> {
    fn from(value: BufferBarrier) -> Self {
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(value.src.stage)
            .src_access_mask(value.src.access)
            .dst_stage_mask(value.dst.stage)
            .dst_access_mask(value.dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(value.buffer)
            .offset(value.offset)
            .size(value.size)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub src: AccessScope,
    pub dst: AccessScope,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl From<ImageBarrier> for vk::ImageMemoryBarrier2<'_> {
    fn from(value: ImageBarrier) -> Self {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(value.src.stage)
            .src_access_mask(value.src.access)
            .dst_stage_mask(value.dst.stage)
            .dst_access_mask(value.dst.access)
            .old_layout(value.old_layout)
            .new_layout(value.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(value.image)
            .subresource_range(value.subresource_range)
    }
}

/// A command sequence that transfer work is appended to.
///
/// Recording never fails; errors surface when the sequence is submitted.
pub trait TransferRecorder: Send {
    fn pipeline_barrier(&mut self, buffers: &[BufferBarrier], images: &[ImageBarrier]);

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
}
