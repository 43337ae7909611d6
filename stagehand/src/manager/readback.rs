use ash::vk;

use crate::allocators::{Allocation, MemoryLocation};
use crate::device::{AccessScope, BufferBarrier, Device, ImageBarrier, TransferRecorder};
use crate::registry::RecordHandle;
use crate::resource::ResourceDescriptor;
use crate::upload::UploadBuffer;
use crate::usage;
use crate::util::format;
use crate::StagehandError;

use super::host::HostMapping;
use super::ResourceManager;

/// Whatever a completed submission may have written
const PRIOR_WRITES: AccessScope = AccessScope::new(
    vk::PipelineStageFlags2::ALL_COMMANDS,
    vk::AccessFlags2::MEMORY_WRITE,
);

enum Readback<H, C> {
    /// Read straight from mapped memory, the entry is pinned until the read is done
    Host(H),
    /// Needs a copy on the queue
    Copy(C),
}

/// A linear image read through its host layout
struct LinearImage {
    mapping: HostMapping,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    extent: vk::Extent3D,
    row_bytes: vk::DeviceSize,
    size: vk::DeviceSize,
}

struct ImageSource {
    image: vk::Image,
    layout: vk::ImageLayout,
    after: AccessScope,
    region: vk::BufferImageCopy,
    size: vk::DeviceSize,
}

impl<D: Device> ResourceManager<D> {
    /// Run one immediate submission that copies into a fresh host-readable buffer of `size`
    /// bytes and return its contents
    fn copy_to_host(
        &self,
        size: vk::DeviceSize,
        record: impl FnOnce(&mut D::Recorder, vk::Buffer),
    ) -> Result<Vec<u8>, StagehandError> {
        let readback = UploadBuffer::new(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback buffer",
        )?;
        let mut recorder = self
            .device
            .begin_recording()
            .map_err(StagehandError::device)?;
        record(&mut recorder, readback.handle());
        let submission = self
            .device
            .submit(recorder)
            .map_err(|error| StagehandError::Submission(format!("{error:#}")))?;
        if let Err(error) = self.device.wait(submission, self.engine.fence_timeout()) {
            if let Err(idle_error) = self.device.wait_idle() {
                tracing::error!("Leaking readback buffer, queue did not drain: {idle_error:#}");
                std::mem::forget(readback);
            }
            return Err(StagehandError::Submission(format!("{error:#}")));
        }
        let mut out = vec![0u8; size as usize];
        readback.read_data(&mut out, 0)?;
        Ok(out)
    }

    /// Copy a subresource of a linear image out row by row through its host layout
    fn read_linear_image(
        &self,
        linear: &LinearImage,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<Vec<u8>, StagehandError> {
        self.invalidate_if_needed(&linear.mapping)?;
        let layout = self
            .device
            .image_subresource_layout(linear.image, linear.aspect, mip_level, array_layer)
            .map_err(StagehandError::device)?;
        let height = linear.extent.height as vk::DeviceSize;
        let mut out = vec![0u8; linear.size as usize];
        let rows = out.chunks_exact_mut(linear.row_bytes as usize).enumerate();
        for (row, bytes) in rows {
            let z = row as vk::DeviceSize / height;
            let y = row as vk::DeviceSize % height;
            let offset = layout.offset + z * layout.depth_pitch + y * layout.row_pitch;
            linear.mapping.read(offset, bytes)?;
        }
        Ok(out)
    }

    /// Current contents of a buffer.
    ///
    /// Mapped buffers are read directly. Anything else is copied out through an immediate
    /// submission, which needs `TRANSFER_SRC` usage. Fails with
    /// [`StagehandError::TransferPending`] while a staged copy into the buffer is unflushed.
    pub fn read_buffer(&self, handle: RecordHandle) -> Result<Vec<u8>, StagehandError> {
        let plan = self.registry.with_entry_mut(handle, |entry| -> Result<_, StagehandError> {
            if entry.has_pending_transfer() {
                return Err(StagehandError::TransferPending);
            }
            let (Some(buffer), ResourceDescriptor::Buffer(descriptor)) =
                (entry.record.buffer(), entry.record.descriptor())
            else {
                return Err(StagehandError::invalid("resource is not a buffer"));
            };
            let descriptor = *descriptor;
            let allocation = entry
                .allocation
                .as_ref()
                .ok_or(StagehandError::NoMappedPointer)?;
            if allocation.mapped_ptr().is_some() {
                let mapping = HostMapping::of(allocation)?;
                entry.host_accesses += 1;
                return Ok(Readback::Host((mapping, descriptor.size)));
            }
            if !descriptor.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
                return Err(StagehandError::invalid(
                    "device-local buffers need TRANSFER_SRC usage to be read back",
                ));
            }
            // destroys wait for the readback like they wait for a staged copy
            entry.pending_transfers += 1;
            Ok(Readback::Copy((buffer, descriptor.size)))
        })??;
        let (buffer, size) = match plan {
            Readback::Host((mapping, size)) => {
                let read = self.invalidate_if_needed(&mapping).and_then(|()| {
                    let mut out = vec![0u8; size as usize];
                    mapping.read(0, &mut out)?;
                    Ok(out)
                });
                self.finish_host_access(handle);
                return read;
            }
            Readback::Copy(source) => source,
        };

        let result = self.copy_to_host(size, |recorder, readback| {
            recorder.pipeline_barrier(
                &[
                    BufferBarrier::whole(buffer, PRIOR_WRITES, AccessScope::TRANSFER_READ),
                    BufferBarrier::whole(readback, AccessScope::NONE, AccessScope::TRANSFER_WRITE),
                ],
                &[],
            );
            recorder.copy_buffer(
                buffer,
                readback,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
            recorder.pipeline_barrier(
                &[BufferBarrier::whole(
                    readback,
                    AccessScope::TRANSFER_WRITE,
                    AccessScope::HOST_READ,
                )],
                &[],
            );
        });
        if let Some(entry) = self.registry.finish_transfer(handle, None) {
            self.release(handle, entry);
        }
        result
    }

    /// Tightly packed texels of one mip level of one array layer.
    ///
    /// Follows the same rules as [`Self::read_buffer`]. Images whose contents were never
    /// defined cannot be read.
    pub fn read_image(
        &self,
        handle: RecordHandle,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<Vec<u8>, StagehandError> {
        let plan = self.registry.with_entry_mut(handle, |entry| -> Result<_, StagehandError> {
            if entry.has_pending_transfer() {
                return Err(StagehandError::TransferPending);
            }
            let (Some(image), ResourceDescriptor::Image(descriptor)) =
                (entry.record.image(), entry.record.descriptor())
            else {
                return Err(StagehandError::invalid("resource is not an image"));
            };
            let descriptor = *descriptor;
            if mip_level >= descriptor.mip_levels || array_layer >= descriptor.array_layers {
                return Err(StagehandError::invalid(format!(
                    "subresource ({mip_level}, {array_layer}) does not exist"
                )));
            }
            if descriptor.samples != vk::SampleCountFlags::TYPE_1 {
                return Err(StagehandError::invalid("multisampled images cannot be read back"));
            }
            let texel_size = format::texel_size(descriptor.format).ok_or_else(|| {
                StagehandError::invalid(format!(
                    "format {:?} has no fixed texel size",
                    descriptor.format
                ))
            })? as vk::DeviceSize;
            let extent = format::mip_extent(descriptor.extent(), mip_level);
            let row_bytes = extent.width as vk::DeviceSize * texel_size;
            let size = row_bytes * extent.height as vk::DeviceSize * extent.depth as vk::DeviceSize;
            let allocation = entry
                .allocation
                .as_ref()
                .ok_or(StagehandError::NoMappedPointer)?;

            if descriptor.tiling == vk::ImageTiling::LINEAR && allocation.mapped_ptr().is_some() {
                let mapping = HostMapping::of(allocation)?;
                entry.host_accesses += 1;
                return Ok(Readback::Host(LinearImage {
                    mapping,
                    image,
                    aspect: descriptor.aspect(),
                    extent,
                    row_bytes,
                    size,
                }));
            }

            if !descriptor.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
                return Err(StagehandError::invalid(
                    "device-local images need TRANSFER_SRC usage to be read back",
                ));
            }
            let layout = entry.record.layout().unwrap_or(vk::ImageLayout::UNDEFINED);
            if matches!(
                layout,
                vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED
            ) {
                return Err(StagehandError::invalid(
                    "image contents were never defined on the device",
                ));
            }
            entry.pending_transfers += 1;
            Ok(Readback::Copy(ImageSource {
                image,
                layout,
                after: usage::image_usage_or_fallback(descriptor.usage).0.scope,
                region: vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: descriptor.aspect(),
                        mip_level,
                        base_array_layer: array_layer,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: extent,
                },
                size,
            }))
        })??;
        let source = match plan {
            Readback::Host(linear) => {
                let read = self.read_linear_image(&linear, mip_level, array_layer);
                self.finish_host_access(handle);
                return read;
            }
            Readback::Copy(source) => source,
        };

        let range = vk::ImageSubresourceRange {
            aspect_mask: source.region.image_subresource.aspect_mask,
            base_mip_level: mip_level,
            level_count: 1,
            base_array_layer: array_layer,
            layer_count: 1,
        };
        let result = self.copy_to_host(source.size, |recorder, readback| {
            recorder.pipeline_barrier(
                &[BufferBarrier::whole(
                    readback,
                    AccessScope::NONE,
                    AccessScope::TRANSFER_WRITE,
                )],
                &[ImageBarrier {
                    image: source.image,
                    src: PRIOR_WRITES,
                    dst: AccessScope::TRANSFER_READ,
                    old_layout: source.layout,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    subresource_range: range,
                }],
            );
            recorder.copy_image_to_buffer(
                source.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback,
                &[source.region],
            );
            // hand the subresource back in the layout the rest of the image is in
            recorder.pipeline_barrier(
                &[BufferBarrier::whole(
                    readback,
                    AccessScope::TRANSFER_WRITE,
                    AccessScope::HOST_READ,
                )],
                &[ImageBarrier {
                    image: source.image,
                    src: AccessScope::TRANSFER_READ,
                    dst: source.after,
                    old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new_layout: source.layout,
                    subresource_range: range,
                }],
            );
        });
        if let Some(entry) = self.registry.finish_transfer(handle, None) {
            self.release(handle, entry);
        }
        result
    }
}
