use ash::vk;

use crate::allocators::{Allocator, MemoryLocation};
use crate::device::{AccessScope, Device, DeviceAllocation};
use crate::diagnostics::Diagnostic;
use crate::registry::{RecordHandle, RegistryEntry};
use crate::resource::data::place_buffer_ranges;
use crate::resource::{
    BufferCreateInfo, ImageCreateInfo, ImageDataRange, ImageDescriptor, MemoryBinding,
    NativeHandle, NativeView, ResourceDescriptor, ResourceRecord, SamplerCreateInfo, UserTag,
    ViewDescriptor,
};
use crate::usage;
use crate::util::{align, format, lcm};
use crate::StagehandError;

use super::host::HostMapping;
use super::ResourceManager;

/// Native objects of a resource under construction, released on drop unless handed to the
/// registry
struct PartialResource<'a, D: Device> {
    device: &'a D,
    handle: Option<NativeHandle>,
    view: Option<NativeView>,
    allocation: Option<DeviceAllocation<D>>,
}

impl<'a, D: Device> PartialResource<'a, D> {
    fn new(device: &'a D) -> Self {
        Self {
            device,
            handle: None,
            view: None,
            allocation: None,
        }
    }

    fn into_entry(mut self, record: ResourceRecord) -> RegistryEntry<DeviceAllocation<D>> {
        self.handle = None;
        self.view = None;
        RegistryEntry::new(record, self.allocation.take())
    }
}

impl<D: Device> Drop for PartialResource<'_, D> {
    fn drop(&mut self) {
        match self.view.take() {
            Some(NativeView::Buffer(view)) => self.device.destroy_buffer_view(view),
            Some(NativeView::Image(view)) => self.device.destroy_image_view(view),
            None => {}
        }
        match self.handle.take() {
            Some(NativeHandle::Buffer(buffer)) => self.device.destroy_buffer(buffer),
            Some(NativeHandle::Image(image)) => self.device.destroy_image(image),
            Some(NativeHandle::Sampler(sampler)) => self.device.destroy_sampler(sampler),
            None => {}
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(error) = self.device.allocator().free(allocation) {
                tracing::error!("Failed to free memory of an abandoned resource: {error:#}");
            }
        }
    }
}

fn allocation_failure(error: anyhow::Error) -> StagehandError {
    match error.downcast::<StagehandError>() {
        Ok(error) => error,
        Err(error) => StagehandError::AllocationFailure(format!("{error:#}")),
    }
}

impl<D: Device> ResourceManager<D> {
    fn allocate(
        &self,
        name: Option<&str>,
        fallback: &str,
        requirements: &vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<DeviceAllocation<D>, StagehandError> {
        self.device
            .allocator()
            .allocate(name.unwrap_or(fallback), requirements, location, linear)
            .map_err(allocation_failure)
    }

    fn report_unmapped(
        &self,
        handle: RecordHandle,
        name: Option<&str>,
        error: Option<StagehandError>,
    ) {
        if let Some(error) = error {
            self.diagnostics.report(Diagnostic::UnmappedUsage {
                resource: Some(handle),
                name: name.map(str::to_string),
                error,
            });
        }
    }

    /// Create a buffer, optionally with a texel view and initial contents.
    ///
    /// Host-visible buffers are written before this returns. Device-local contents are staged
    /// and land with the next [`Self::complete_transfers`].
    pub fn create_buffer(
        &self,
        create_info: BufferCreateInfo<'_>,
    ) -> Result<RecordHandle, StagehandError> {
        let descriptor = create_info.descriptor;
        descriptor.validate()?;
        if let Some(view) = &create_info.view {
            view.validate(&descriptor)?;
        }
        let (offsets, end) = place_buffer_ranges(create_info.data)?;
        if end > descriptor.size {
            return Err(StagehandError::invalid(format!(
                "{end} bytes of initial data do not fit a {} byte buffer",
                descriptor.size
            )));
        }
        let has_data = create_info.data.iter().any(|range| !range.data.is_empty());
        let host_visible = create_info.location.is_host_visible();
        if has_data
            && !host_visible
            && !descriptor
                .usage
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        {
            return Err(StagehandError::invalid(
                "device-local buffers with initial data need TRANSFER_DST usage",
            ));
        }

        let mut parts = PartialResource::new(self.device.as_ref());
        let buffer = self
            .device
            .create_buffer(descriptor.size, descriptor.usage)
            .map_err(StagehandError::device)?;
        parts.handle = Some(NativeHandle::Buffer(buffer));
        let requirements = self
            .device
            .buffer_memory_requirements(buffer)
            .map_err(StagehandError::device)?;
        let allocation = parts.allocation.insert(self.allocate(
            create_info.name,
            "buffer",
            &requirements,
            create_info.location,
            true,
        )?);
        self.device
            .bind_buffer_memory(buffer, allocation)
            .map_err(StagehandError::device)?;
        let binding = MemoryBinding::new(allocation, create_info.location);
        if let Some(view) = &create_info.view {
            let view = self
                .device
                .create_buffer_view(buffer, view.format, view.offset, view.range)
                .map_err(StagehandError::device)?;
            parts.view = Some(NativeView::Buffer(view));
        }

        if host_visible && has_data {
            let mapping = HostMapping::of(allocation)?;
            for (range, offset) in create_info.data.iter().zip(&offsets) {
                mapping.write(*offset, range.data)?;
            }
            self.flush_if_needed(&mapping, 0, end)?;
        }

        let record = ResourceRecord {
            handle: NativeHandle::Buffer(buffer),
            descriptor: ResourceDescriptor::Buffer(descriptor),
            view: parts.view,
            view_descriptor: create_info.view.map(ViewDescriptor::Buffer),
            name: create_info.name.map(str::to_string),
            user_tag: create_info.user_tag,
            binding: Some(binding),
            layout: None,
        };
        tracing::debug!("Created buffer {} of {} bytes", record.label(), descriptor.size);

        if host_visible || !has_data {
            return Ok(self.registry.insert(parts.into_entry(record)));
        }

        let mut staging = self.engine.pool().acquire(end)?;
        let mut regions = Vec::with_capacity(create_info.data.len());
        for (range, offset) in create_info.data.iter().zip(&offsets) {
            if range.data.is_empty() {
                continue;
            }
            staging.set_data(range.data, *offset)?;
            regions.push(vk::BufferCopy {
                src_offset: *offset,
                dst_offset: *offset,
                size: range.data.len() as vk::DeviceSize,
            });
        }
        let (after, unmapped) = usage::buffer_access_or_fallback(descriptor.usage);

        let mut entry = parts.into_entry(record);
        entry.pending_transfers = 1;
        let handle = self.registry.insert(entry);
        self.report_unmapped(handle, create_info.name, unmapped);

        let recorded = self.engine.record(|batch| {
            batch.record_buffer_upload(
                handle,
                &staging,
                buffer,
                &regions,
                AccessScope::NONE,
                after,
            );
            batch.id()
        });
        match recorded {
            Ok(batch) => {
                self.engine.pool().retire(batch, staging);
                Ok(handle)
            }
            Err(error) => {
                if let Some(entry) = self.registry.take(handle) {
                    self.release(handle, entry);
                }
                Err(error)
            }
        }
    }

    /// Create an image, optionally with a view and initial texels.
    ///
    /// Device-local images with data are moved into the layout their usage implies by the next
    /// [`Self::complete_transfers`]. Host-visible images with data must be linearly tiled and are
    /// written before this returns, they stay `PREINITIALIZED`.
    pub fn create_image(
        &self,
        create_info: ImageCreateInfo<'_>,
    ) -> Result<RecordHandle, StagehandError> {
        let descriptor = create_info.descriptor;
        descriptor.validate()?;
        let view = create_info
            .view
            .as_ref()
            .map(|view| view.resolve(&descriptor))
            .transpose()?;
        for range in create_info.data {
            range.validate(&descriptor)?;
        }
        let has_data = !create_info.data.is_empty();
        let host_visible = create_info.location.is_host_visible();
        if has_data && host_visible && descriptor.tiling != vk::ImageTiling::LINEAR {
            return Err(StagehandError::invalid(
                "host-visible images with initial data must be linearly tiled",
            ));
        }
        if has_data
            && !host_visible
            && !descriptor
                .usage
                .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(StagehandError::invalid(
                "device-local images with initial data need TRANSFER_DST usage",
            ));
        }

        let initial_layout = if has_data && host_visible {
            vk::ImageLayout::PREINITIALIZED
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let mut parts = PartialResource::new(self.device.as_ref());
        let image = self
            .device
            .create_image(&descriptor, initial_layout)
            .map_err(StagehandError::device)?;
        parts.handle = Some(NativeHandle::Image(image));
        let requirements = self
            .device
            .image_memory_requirements(image)
            .map_err(StagehandError::device)?;
        let allocation = parts.allocation.insert(self.allocate(
            create_info.name,
            "image",
            &requirements,
            create_info.location,
            descriptor.tiling == vk::ImageTiling::LINEAR,
        )?);
        self.device
            .bind_image_memory(image, allocation)
            .map_err(StagehandError::device)?;
        let binding = MemoryBinding::new(allocation, create_info.location);
        if let Some(view) = &view {
            let view = self
                .device
                .create_image_view(image, view.view_type, view.format, view.subresource_range)
                .map_err(StagehandError::device)?;
            parts.view = Some(NativeView::Image(view));
        }

        if has_data && host_visible {
            let mapping = HostMapping::of(allocation)?;
            for range in create_info.data {
                self.write_linear_image(image, &descriptor, &mapping, range)?;
            }
            self.flush_if_needed(&mapping, 0, mapping.size())?;
        }

        let record = ResourceRecord {
            handle: NativeHandle::Image(image),
            descriptor: ResourceDescriptor::Image(descriptor),
            view: parts.view,
            view_descriptor: create_info.view.map(ViewDescriptor::Image),
            name: create_info.name.map(str::to_string),
            user_tag: create_info.user_tag,
            binding: Some(binding),
            layout: Some(initial_layout),
        };
        tracing::debug!(
            "Created image {} of {}x{}x{}",
            record.label(),
            descriptor.width,
            descriptor.height,
            descriptor.depth
        );

        if host_visible || !has_data {
            return Ok(self.registry.insert(parts.into_entry(record)));
        }

        // texel size is known, every range validated against it
        let texel_size = format::texel_size(descriptor.format).unwrap_or(1) as vk::DeviceSize;
        let alignment = lcm(self.staging_alignment, texel_size);
        let mut offsets = Vec::with_capacity(create_info.data.len());
        let mut cursor: vk::DeviceSize = 0;
        for range in create_info.data {
            let offset = align(cursor, alignment);
            offsets.push(offset);
            cursor = offset + range.data.len() as vk::DeviceSize;
        }

        let mut staging = self.engine.pool().acquire(cursor)?;
        let aspect = descriptor.aspect();
        let mut regions = Vec::with_capacity(create_info.data.len());
        for (range, offset) in create_info.data.iter().zip(&offsets) {
            staging.set_data(range.data, *offset)?;
            regions.push(range.copy_region(aspect, *offset));
        }
        let (state, unmapped) = usage::image_usage_or_fallback(descriptor.usage);

        let mut entry = parts.into_entry(record);
        entry.pending_transfers = 1;
        let handle = self.registry.insert(entry);
        self.report_unmapped(handle, create_info.name, unmapped);

        let recorded = self.engine.record(|batch| {
            batch.record_image_upload(
                handle,
                &staging,
                image,
                descriptor.full_range(),
                vk::ImageLayout::UNDEFINED,
                &regions,
                state.layout,
                state.scope,
            );
            batch.id()
        });
        match recorded {
            Ok(batch) => {
                self.engine.pool().retire(batch, staging);
                Ok(handle)
            }
            Err(error) => {
                if let Some(entry) = self.registry.take(handle) {
                    self.release(handle, entry);
                }
                Err(error)
            }
        }
    }

    /// Write a region row by row through the image's host layout
    fn write_linear_image(
        &self,
        image: vk::Image,
        descriptor: &ImageDescriptor,
        mapping: &HostMapping,
        range: &ImageDataRange<'_>,
    ) -> Result<(), StagehandError> {
        let texel_size = format::texel_size(descriptor.format)
            .ok_or_else(|| StagehandError::invalid("format has no fixed texel size"))?;
        let texel = texel_size as vk::DeviceSize;
        let row_bytes = (range.width as vk::DeviceSize * texel) as usize;
        let layer_size = range.layer_size(texel_size) as usize;
        for layer in 0..range.layer_count {
            let layout = self
                .device
                .image_subresource_layout(
                    image,
                    descriptor.aspect(),
                    range.mip_level,
                    range.base_array_layer + layer,
                )
                .map_err(StagehandError::device)?;
            for z in 0..range.depth {
                for y in 0..range.height {
                    let src = layer as usize * layer_size
                        + (z as usize * range.height as usize + y as usize) * row_bytes;
                    let dst = layout.offset
                        + (range.offset[2] + z) as vk::DeviceSize * layout.depth_pitch
                        + (range.offset[1] + y) as vk::DeviceSize * layout.row_pitch
                        + range.offset[0] as vk::DeviceSize * texel;
                    mapping.write(dst, &range.data[src..src + row_bytes])?;
                }
            }
        }
        Ok(())
    }

    pub fn create_sampler(
        &self,
        create_info: SamplerCreateInfo<'_>,
    ) -> Result<RecordHandle, StagehandError> {
        create_info.descriptor.validate()?;
        let sampler = self
            .device
            .create_sampler(&create_info.descriptor)
            .map_err(StagehandError::device)?;
        let record = ResourceRecord {
            handle: NativeHandle::Sampler(sampler),
            descriptor: ResourceDescriptor::Sampler(create_info.descriptor),
            view: None,
            view_descriptor: None,
            name: create_info.name.map(str::to_string),
            user_tag: create_info.user_tag,
            binding: None,
            layout: None,
        };
        Ok(self.registry.insert(RegistryEntry::new(record, None)))
    }

    /// Overwrite part of an existing buffer.
    ///
    /// Host-visible buffers are written in place. Device-local buffers get a staged copy ordered
    /// after whatever their usage says may still be reading them.
    pub fn write_buffer(
        &self,
        handle: RecordHandle,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<(), StagehandError> {
        if data.is_empty() {
            return Ok(());
        }
        let (buffer, descriptor, host_visible) = self.registry.with_entry(handle, |entry| {
            match (entry.record.buffer(), entry.record.descriptor()) {
                (Some(buffer), ResourceDescriptor::Buffer(descriptor)) => Ok((
                    buffer,
                    *descriptor,
                    entry
                        .record
                        .binding()
                        .is_some_and(|binding| binding.is_host_visible()),
                )),
                _ => Err(StagehandError::invalid("resource is not a buffer")),
            }
        })??;
        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.map_or(true, |end| end > descriptor.size) {
            return Err(StagehandError::invalid(format!(
                "write of {} bytes at {offset} overflows a {} byte buffer",
                data.len(),
                descriptor.size
            )));
        }

        if host_visible {
            let mapping = self.registry.begin_host_access(handle, |entry| {
                HostMapping::of(
                    entry
                        .allocation
                        .as_ref()
                        .ok_or(StagehandError::NoMappedPointer)?,
                )
            })?;
            let written = mapping.write(offset, data).and_then(|()| {
                self.flush_if_needed(&mapping, offset, data.len() as vk::DeviceSize)
            });
            self.finish_host_access(handle);
            return written;
        }

        if !descriptor.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            return Err(StagehandError::invalid(
                "device-local buffers written after creation need TRANSFER_DST usage",
            ));
        }
        let mut staging = self
            .engine
            .pool()
            .acquire(data.len() as vk::DeviceSize)?;
        staging.set_data(data, 0)?;
        self.registry
            .with_entry_mut(handle, |entry| entry.pending_transfers += 1)?;

        let (scope, unmapped) = usage::buffer_access_or_fallback(descriptor.usage);
        if let Some(error) = unmapped {
            let name = self.registry.with_entry(handle, |entry| entry.record.name.clone());
            self.report_unmapped(handle, name.ok().flatten().as_deref(), Some(error));
        }
        let recorded = self.engine.record(|batch| {
            batch.record_buffer_upload(
                handle,
                &staging,
                buffer,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: offset,
                    size: data.len() as vk::DeviceSize,
                }],
                scope,
                scope,
            );
            batch.id()
        });
        match recorded {
            Ok(batch) => {
                self.engine.pool().retire(batch, staging);
                Ok(())
            }
            Err(error) => {
                if let Some(entry) = self.registry.finish_transfer(handle, None) {
                    self.release(handle, entry);
                }
                Err(error)
            }
        }
    }

    /// Replace the tag attached to a resource
    pub fn set_user_tag(
        &self,
        handle: RecordHandle,
        user_tag: Option<UserTag>,
    ) -> Result<(), StagehandError> {
        self.registry
            .with_entry_mut(handle, |entry| entry.record.user_tag = user_tag)
    }
}
