use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use ash::vk;
use ash::vk::Handle;

use super::memory::{HeadlessAllocation, HeadlessAllocator, MemoryBlock};
use super::recorder::{HeadlessCommand, HeadlessRecorder};
use crate::allocators::Allocation;
use crate::device::{Device, MappedRange, QueueInfo};
use crate::resource::{ImageDescriptor, SamplerDescriptor};
use crate::util::align;
use crate::util::format::PackedImageLayout;

/// Texel size assumed for formats without a fixed one
const OPAQUE_TEXEL_SIZE: u32 = 16;

const MEMORY_ALIGNMENT: vk::DeviceSize = 16;

#[derive(Debug)]
struct BoundMemory {
    block: Arc<MemoryBlock>,
    offset: vk::DeviceSize,
}

#[derive(Debug)]
struct HeadlessBuffer {
    size: vk::DeviceSize,
    memory: Option<BoundMemory>,
}

#[derive(Debug)]
struct HeadlessImage {
    descriptor: ImageDescriptor,
    packed: PackedImageLayout,
    /// One entry per (mip, layer)
    layouts: Vec<vk::ImageLayout>,
    memory: Option<BoundMemory>,
}

impl HeadlessImage {
    /// Indices into [`Self::layouts`] covered by `range`
    fn subresources(&self, range: &vk::ImageSubresourceRange) -> Result<Vec<usize>, String> {
        let mips = self.descriptor.mip_levels;
        let layers = self.descriptor.array_layers;
        let level_count = if range.level_count == vk::REMAINING_MIP_LEVELS {
            mips.saturating_sub(range.base_mip_level)
        } else {
            range.level_count
        };
        let layer_count = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
            layers.saturating_sub(range.base_array_layer)
        } else {
            range.layer_count
        };
        if level_count == 0
            || layer_count == 0
            || range.base_mip_level + level_count > mips
            || range.base_array_layer + layer_count > layers
        {
            return Err(format!(
                "subresource range {range:?} is outside {mips} mips and {layers} layers"
            ));
        }
        let mut indices = Vec::with_capacity((level_count * layer_count) as usize);
        for mip in range.base_mip_level..range.base_mip_level + level_count {
            for layer in range.base_array_layer..range.base_array_layer + layer_count {
                indices.push((mip * layers + layer) as usize);
            }
        }
        Ok(indices)
    }

    fn region_subresources(&self, region: &vk::BufferImageCopy) -> Result<Vec<usize>, String> {
        let sub = region.image_subresource;
        self.subresources(&vk::ImageSubresourceRange {
            aspect_mask: sub.aspect_mask,
            base_mip_level: sub.mip_level,
            level_count: 1,
            base_array_layer: sub.base_array_layer,
            layer_count: sub.layer_count,
        })
    }

    /// (buffer offset, image offset, length) of every texel row a copy region touches
    fn region_rows(
        &self,
        region: &vk::BufferImageCopy,
    ) -> Result<Vec<(vk::DeviceSize, vk::DeviceSize, usize)>, String> {
        let texel = self.packed.texel_size as vk::DeviceSize;
        let extent = region.image_extent;
        let offset = region.image_offset;
        let sub = region.image_subresource;
        if sub.mip_level >= self.descriptor.mip_levels {
            return Err(format!("copy targets missing mip {}", sub.mip_level));
        }
        if offset.x < 0 || offset.y < 0 || offset.z < 0 {
            return Err(format!("negative image offset {offset:?}"));
        }
        let mip = crate::util::format::mip_extent(self.descriptor.extent(), sub.mip_level);
        if offset.x as u32 + extent.width > mip.width
            || offset.y as u32 + extent.height > mip.height
            || offset.z as u32 + extent.depth > mip.depth
        {
            return Err(format!(
                "copy of {extent:?} at {offset:?} exceeds mip {} extent {mip:?}",
                sub.mip_level
            ));
        }
        let row_length = match region.buffer_row_length {
            0 => extent.width,
            length => length,
        } as vk::DeviceSize;
        let image_height = match region.buffer_image_height {
            0 => extent.height,
            height => height,
        } as vk::DeviceSize;

        let mut rows = Vec::new();
        for layer in 0..sub.layer_count {
            let layout = self
                .packed
                .subresource(sub.mip_level, sub.base_array_layer + layer);
            for z in 0..extent.depth as vk::DeviceSize {
                for y in 0..extent.height as vk::DeviceSize {
                    let slice = layer as vk::DeviceSize * extent.depth as vk::DeviceSize + z;
                    let buffer_offset =
                        region.buffer_offset + ((slice * image_height + y) * row_length) * texel;
                    let image_offset = layout.offset
                        + (offset.z as vk::DeviceSize + z) * layout.depth_pitch
                        + (offset.y as vk::DeviceSize + y) * layout.row_pitch
                        + offset.x as vk::DeviceSize * texel;
                    rows.push((
                        buffer_offset,
                        image_offset,
                        (extent.width as vk::DeviceSize * texel) as usize,
                    ));
                }
            }
        }
        Ok(rows)
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    buffers: HashMap<vk::Buffer, HeadlessBuffer>,
    images: HashMap<vk::Image, HeadlessImage>,
    buffer_views: HashMap<vk::BufferView, vk::Buffer>,
    image_views: HashMap<vk::ImageView, vk::Image>,
    samplers: HashSet<vk::Sampler>,
    command_pools: HashSet<vk::CommandPool>,
    submissions: u64,
    last_submission: Option<Vec<HeadlessCommand>>,
    validation_errors: Vec<String>,
    fail_next_submission: bool,
}

fn bound(memory: &Option<BoundMemory>, what: String) -> Result<&BoundMemory, String> {
    memory
        .as_ref()
        .ok_or_else(|| format!("{what} has no memory bound"))
}

impl HeadlessState {
    fn buffer_memory(&self, buffer: vk::Buffer) -> Result<(&BoundMemory, vk::DeviceSize), String> {
        let record = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| format!("unknown buffer {buffer:?}"))?;
        Ok((bound(&record.memory, format!("{buffer:?}"))?, record.size))
    }

    fn copy_bytes(
        src: &BoundMemory,
        src_offset: vk::DeviceSize,
        dst: &BoundMemory,
        dst_offset: vk::DeviceSize,
        len: usize,
    ) -> Result<(), String> {
        let mut bytes = vec![0u8; len];
        src.block
            .device_bytes()
            .read((src.offset + src_offset) as usize, &mut bytes)
            .map_err(|error| error.to_string())?;
        dst.block
            .device_bytes()
            .write((dst.offset + dst_offset) as usize, &bytes)
            .map_err(|error| error.to_string())
    }

    /// Execute a submission in order, returning every hazard or misuse found on the way
    fn execute(&mut self, commands: &[HeadlessCommand]) -> Vec<String> {
        let mut errors = Vec::new();
        // resources a barrier made writable for transfers
        let mut writable: HashSet<u64> = HashSet::new();
        // resources written by a copy that no barrier has released yet
        let mut unreleased: HashSet<u64> = HashSet::new();

        for command in commands {
            if let Err(error) = self.execute_one(command, &mut writable, &mut unreleased) {
                errors.push(error);
            }
        }
        for resource in unreleased {
            errors.push(format!(
                "transfer writes to {resource:#x} are never made available by a barrier"
            ));
        }
        errors
    }

    fn execute_one(
        &mut self,
        command: &HeadlessCommand,
        writable: &mut HashSet<u64>,
        unreleased: &mut HashSet<u64>,
    ) -> Result<(), String> {
        match command {
            HeadlessCommand::Barrier { buffers, images } => {
                for barrier in buffers {
                    if !self.buffers.contains_key(&barrier.buffer) {
                        return Err(format!("barrier on unknown buffer {:?}", barrier.buffer));
                    }
                    let raw = barrier.buffer.as_raw();
                    if barrier.src.writes_transfer() {
                        unreleased.remove(&raw);
                        writable.remove(&raw);
                    }
                    if barrier.dst.writes_transfer() {
                        writable.insert(raw);
                    }
                }
                for barrier in images {
                    let image = self
                        .images
                        .get_mut(&barrier.image)
                        .ok_or_else(|| format!("barrier on unknown image {:?}", barrier.image))?;
                    for index in image.subresources(&barrier.subresource_range)? {
                        let current = image.layouts[index];
                        if barrier.old_layout != vk::ImageLayout::UNDEFINED
                            && barrier.old_layout != current
                        {
                            return Err(format!(
                                "{:?} transitions from {:?} but is in {current:?}",
                                barrier.image, barrier.old_layout
                            ));
                        }
                        image.layouts[index] = barrier.new_layout;
                    }
                    let raw = barrier.image.as_raw();
                    if barrier.src.writes_transfer() {
                        unreleased.remove(&raw);
                        writable.remove(&raw);
                    }
                    if barrier.dst.writes_transfer() {
                        writable.insert(raw);
                    }
                }
                Ok(())
            }
            HeadlessCommand::CopyBuffer { src, dst, regions } => {
                if !writable.contains(&dst.as_raw()) {
                    return Err(format!("copy into {dst:?} without a transfer-write barrier"));
                }
                unreleased.insert(dst.as_raw());
                let (src_memory, src_size) = self.buffer_memory(*src)?;
                let (dst_memory, dst_size) = self.buffer_memory(*dst)?;
                for region in regions {
                    if region.size == 0
                        || region.src_offset + region.size > src_size
                        || region.dst_offset + region.size > dst_size
                    {
                        return Err(format!("buffer copy {region:?} is out of bounds"));
                    }
                    Self::copy_bytes(
                        src_memory,
                        region.src_offset,
                        dst_memory,
                        region.dst_offset,
                        region.size as usize,
                    )?;
                }
                Ok(())
            }
            HeadlessCommand::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions,
            } => {
                if !matches!(
                    *dst_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::GENERAL
                ) {
                    return Err(format!("copy into {dst:?} in layout {dst_layout:?}"));
                }
                if !writable.contains(&dst.as_raw()) {
                    return Err(format!("copy into {dst:?} without a transfer-write barrier"));
                }
                unreleased.insert(dst.as_raw());
                let (src_memory, src_size) = self.buffer_memory(*src)?;
                let image = self
                    .images
                    .get(dst)
                    .ok_or_else(|| format!("copy into unknown image {dst:?}"))?;
                let image_memory = bound(&image.memory, format!("{dst:?}"))?;
                for region in regions {
                    for index in image.region_subresources(region)? {
                        if image.layouts[index] != *dst_layout {
                            return Err(format!(
                                "{dst:?} subresource {index} is in {:?}, copy expects {dst_layout:?}",
                                image.layouts[index]
                            ));
                        }
                    }
                    for (buffer_offset, image_offset, len) in image.region_rows(region)? {
                        if buffer_offset + len as vk::DeviceSize > src_size {
                            return Err(format!("copy reads past the end of {src:?}"));
                        }
                        Self::copy_bytes(src_memory, buffer_offset, image_memory, image_offset, len)?;
                    }
                }
                Ok(())
            }
            HeadlessCommand::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                regions,
            } => {
                if !matches!(
                    *src_layout,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::GENERAL
                ) {
                    return Err(format!("copy out of {src:?} in layout {src_layout:?}"));
                }
                if !writable.contains(&dst.as_raw()) {
                    return Err(format!("copy into {dst:?} without a transfer-write barrier"));
                }
                unreleased.insert(dst.as_raw());
                let (dst_memory, dst_size) = self.buffer_memory(*dst)?;
                let image = self
                    .images
                    .get(src)
                    .ok_or_else(|| format!("copy out of unknown image {src:?}"))?;
                let image_memory = bound(&image.memory, format!("{src:?}"))?;
                for region in regions {
                    for index in image.region_subresources(region)? {
                        if image.layouts[index] != *src_layout {
                            return Err(format!(
                                "{src:?} subresource {index} is in {:?}, copy expects {src_layout:?}",
                                image.layouts[index]
                            ));
                        }
                    }
                    for (buffer_offset, image_offset, len) in image.region_rows(region)? {
                        if buffer_offset + len as vk::DeviceSize > dst_size {
                            return Err(format!("copy writes past the end of {dst:?}"));
                        }
                        Self::copy_bytes(image_memory, image_offset, dst_memory, buffer_offset, len)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeadlessDeviceCreateInfo {
    /// Whether host-visible memory is coherent
    pub coherent: bool,
    /// Cap on live device memory, [`None`] for unlimited
    pub memory_budget: Option<vk::DeviceSize>,
    pub queue_family_index: u32,
}

impl Default for HeadlessDeviceCreateInfo {
    fn default() -> Self {
        Self {
            coherent: true,
            memory_budget: None,
            queue_family_index: 0,
        }
    }
}

/// Handle of an executed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessSubmission(pub u64);

/// A [`Device`] that runs entirely on host memory.
///
/// Submissions execute synchronously. While executing, the device tracks image layouts and checks
/// that every copy is bracketed by barriers; anything off is collected in
/// [`Self::validation_errors`] much like a validation layer would report it.
#[derive(Debug)]
pub struct HeadlessDevice {
    allocator: HeadlessAllocator,
    queue_info: QueueInfo,
    state: Mutex<HeadlessState>,
    next_handle: AtomicU64,
    open_recordings: AtomicUsize,
    flushes: AtomicU64,
    invalidations: AtomicU64,
}

impl HeadlessDevice {
    pub fn new(create_info: HeadlessDeviceCreateInfo) -> Self {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating headless device {create_info:?}");

        Self {
            allocator: HeadlessAllocator::new(create_info.memory_budget, create_info.coherent),
            queue_info: QueueInfo {
                family_index: create_info.queue_family_index,
                index: 0,
                queue_flags: vk::QueueFlags::TRANSFER,
            },
            state: Mutex::new(HeadlessState::default()),
            next_handle: AtomicU64::new(0x1000),
            open_recordings: AtomicUsize::new(0),
            flushes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn bind(
        &self,
        allocation: &HeadlessAllocation,
        required: vk::DeviceSize,
    ) -> Result<BoundMemory> {
        let block = self
            .allocator
            .block(allocation.memory())
            .context("binding memory that is not allocated")?;
        anyhow::ensure!(
            allocation.offset() + required <= block.size(),
            "{} bytes do not fit {} byte block {:?}",
            required,
            block.size(),
            block.handle()
        );
        Ok(BoundMemory {
            block,
            offset: allocation.offset(),
        })
    }

    /// Batches executed so far
    pub fn submission_count(&self) -> u64 {
        self.state().submissions
    }

    /// Hazards and misuse found while executing submissions or destroying objects
    pub fn validation_errors(&self) -> Vec<String> {
        self.state().validation_errors.clone()
    }

    /// Commands of the most recent submission
    pub fn last_submission(&self) -> Option<Vec<HeadlessCommand>> {
        self.state().last_submission.clone()
    }

    /// Make the next submission fail as if the device was lost
    pub fn fail_next_submission(&self) {
        self.state().fail_next_submission = true;
    }

    /// Layout shared by every subresource of `image`, [`None`] if unknown or mixed
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        let state = self.state();
        let layouts = &state.images.get(&image)?.layouts;
        let first = *layouts.first()?;
        layouts.iter().all(|layout| *layout == first).then_some(first)
    }

    /// Bound contents of `buffer` as the device sees them
    pub fn read_buffer_memory(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let state = self.state();
        let record = state.buffers.get(&buffer)?;
        let memory = record.memory.as_ref()?;
        let mut bytes = vec![0u8; record.size as usize];
        memory
            .block
            .device_bytes()
            .read(memory.offset as usize, &mut bytes)
            .ok()?;
        Some(bytes)
    }

    /// Native objects that have not been destroyed
    pub fn live_objects(&self) -> usize {
        let state = self.state();
        state.buffers.len()
            + state.images.len()
            + state.buffer_views.len()
            + state.image_views.len()
            + state.samplers.len()
    }

    /// Command pools of recordings that have not been submitted or discarded
    pub fn live_command_pools(&self) -> usize {
        self.state().command_pools.len()
    }

    /// Command sequences begun and neither submitted nor discarded
    pub fn open_recordings(&self) -> usize {
        self.open_recordings.load(Ordering::Acquire)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn invalidate_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl Device for HeadlessDevice {
    type Allocator = HeadlessAllocator;
    type Recorder = HeadlessRecorder;
    type Submission = HeadlessSubmission;

    fn queue_info(&self) -> QueueInfo {
        self.queue_info
    }

    fn allocator(&self) -> &HeadlessAllocator {
        &self.allocator
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        anyhow::ensure!(size > 0, "buffer size must be non-zero");
        anyhow::ensure!(!usage.is_empty(), "buffer usage must not be empty");
        let buffer = self.next_handle();
        self.state().buffers.insert(
            buffer,
            HeadlessBuffer {
                size,
                memory: None,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        if state.buffers.remove(&buffer).is_none() {
            state
                .validation_errors
                .push(format!("destroying unknown buffer {buffer:?}"));
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> Result<vk::MemoryRequirements> {
        let size = self
            .state()
            .buffers
            .get(&buffer)
            .map(|buffer| buffer.size)
            .context("unknown buffer")?;
        Ok(vk::MemoryRequirements {
            size: align(size, MEMORY_ALIGNMENT),
            alignment: MEMORY_ALIGNMENT,
            memory_type_bits: 1,
        })
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, allocation: &HeadlessAllocation) -> Result<()> {
        let mut state = self.state();
        let record = state.buffers.get_mut(&buffer).context("unknown buffer")?;
        anyhow::ensure!(record.memory.is_none(), "{buffer:?} is already bound");
        record.memory = Some(self.bind(allocation, record.size)?);
        Ok(())
    }

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<vk::BufferView> {
        let mut state = self.state();
        let size = state.buffers.get(&buffer).context("unknown buffer")?.size;
        anyhow::ensure!(format != vk::Format::UNDEFINED, "undefined view format");
        anyhow::ensure!(
            offset < size && (range == vk::WHOLE_SIZE || offset + range <= size),
            "view {offset}..+{range} is outside a {size} byte buffer"
        );
        let view = self.next_handle();
        state.buffer_views.insert(view, buffer);
        Ok(view)
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        let mut state = self.state();
        if state.buffer_views.remove(&view).is_none() {
            state
                .validation_errors
                .push(format!("destroying unknown buffer view {view:?}"));
        }
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
        initial_layout: vk::ImageLayout,
    ) -> Result<vk::Image> {
        anyhow::ensure!(
            matches!(
                initial_layout,
                vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED
            ),
            "images must start UNDEFINED or PREINITIALIZED"
        );
        descriptor.validate()?;
        let packed = descriptor.packed_layout().unwrap_or(PackedImageLayout {
            texel_size: OPAQUE_TEXEL_SIZE,
            extent: descriptor.extent(),
            mip_levels: descriptor.mip_levels,
            array_layers: descriptor.array_layers,
        });
        let image = self.next_handle();
        self.state().images.insert(
            image,
            HeadlessImage {
                descriptor: *descriptor,
                packed,
                layouts: vec![
                    initial_layout;
                    (descriptor.mip_levels * descriptor.array_layers) as usize
                ],
                memory: None,
            },
        );
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        if state.images.remove(&image).is_none() {
            state
                .validation_errors
                .push(format!("destroying unknown image {image:?}"));
        }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> Result<vk::MemoryRequirements> {
        let size = self
            .state()
            .images
            .get(&image)
            .map(|image| image.packed.size())
            .context("unknown image")?;
        Ok(vk::MemoryRequirements {
            size: align(size, MEMORY_ALIGNMENT),
            alignment: MEMORY_ALIGNMENT,
            memory_type_bits: 1,
        })
    }

    fn bind_image_memory(&self, image: vk::Image, allocation: &HeadlessAllocation) -> Result<()> {
        let mut state = self.state();
        let record = state.images.get_mut(&image).context("unknown image")?;
        anyhow::ensure!(record.memory.is_none(), "{image:?} is already bound");
        record.memory = Some(self.bind(allocation, record.packed.size())?);
        Ok(())
    }

    fn image_subresource_layout(
        &self,
        image: vk::Image,
        _aspect: vk::ImageAspectFlags,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<vk::SubresourceLayout> {
        let state = self.state();
        let record = state.images.get(&image).context("unknown image")?;
        anyhow::ensure!(
            record.descriptor.tiling == vk::ImageTiling::LINEAR,
            "subresource layouts are only defined for linear images"
        );
        anyhow::ensure!(
            mip_level < record.descriptor.mip_levels
                && array_layer < record.descriptor.array_layers,
            "subresource ({mip_level}, {array_layer}) does not exist"
        );
        Ok(record.packed.subresource(mip_level, array_layer))
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _view_type: vk::ImageViewType,
        format: vk::Format,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView> {
        let mut state = self.state();
        let record = state.images.get(&image).context("unknown image")?;
        anyhow::ensure!(format != vk::Format::UNDEFINED, "undefined view format");
        record
            .subresources(&subresource_range)
            .map_err(anyhow::Error::msg)?;
        let view = self.next_handle();
        state.image_views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state();
        if state.image_views.remove(&view).is_none() {
            state
                .validation_errors
                .push(format!("destroying unknown image view {view:?}"));
        }
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<vk::Sampler> {
        descriptor.validate()?;
        let sampler = self.next_handle();
        self.state().samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        let mut state = self.state();
        if !state.samplers.remove(&sampler) {
            state
                .validation_errors
                .push(format!("destroying unknown sampler {sampler:?}"));
        }
    }

    fn flush_mapped_range(&self, range: MappedRange) -> Result<()> {
        let block = self
            .allocator
            .block(range.memory)
            .context("flushing memory that is not allocated")?;
        block.flush(range.offset, range.size)?;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn invalidate_mapped_range(&self, range: MappedRange) -> Result<()> {
        let block = self
            .allocator
            .block(range.memory)
            .context("invalidating memory that is not allocated")?;
        block.invalidate(range.offset, range.size)?;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn begin_recording(&self) -> Result<HeadlessRecorder> {
        let pool: vk::CommandPool = self.next_handle();
        let mut state = self.state();
        if !state.command_pools.insert(pool) {
            state
                .validation_errors
                .push(format!("command pool {pool:?} is shared between recordings"));
        }
        self.open_recordings.fetch_add(1, Ordering::AcqRel);
        Ok(HeadlessRecorder {
            pool,
            commands: Vec::new(),
        })
    }

    fn discard_recording(&self, recorder: HeadlessRecorder) {
        self.open_recordings.fetch_sub(1, Ordering::AcqRel);
        self.state().command_pools.remove(&recorder.pool);
    }

    fn submit(&self, recorder: HeadlessRecorder) -> Result<HeadlessSubmission> {
        self.open_recordings.fetch_sub(1, Ordering::AcqRel);
        let mut state = self.state();
        // executes synchronously, so the pool retires with the submission
        state.command_pools.remove(&recorder.pool);
        if std::mem::take(&mut state.fail_next_submission) {
            anyhow::bail!(vk::Result::ERROR_DEVICE_LOST);
        }
        let errors = state.execute(&recorder.commands);
        for error in &errors {
            tracing::error!("Headless validation: {error}");
        }
        state.validation_errors.extend(errors);
        state.submissions += 1;
        state.last_submission = Some(recorder.commands);
        Ok(HeadlessSubmission(state.submissions))
    }

    fn wait(&self, _submission: HeadlessSubmission, _timeout: u64) -> Result<()> {
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::{Allocator, MemoryLocation};
    use crate::device::{AccessScope, BufferBarrier, ImageBarrier, TransferRecorder};

    fn bound_buffer(
        device: &HeadlessDevice,
        size: vk::DeviceSize,
        location: MemoryLocation,
    ) -> (vk::Buffer, HeadlessAllocation) {
        let buffer = device
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .unwrap();
        let requirements = device.buffer_memory_requirements(buffer).unwrap();
        let allocation = device
            .allocator()
            .allocate("test", &requirements, location, true)
            .unwrap();
        device.bind_buffer_memory(buffer, &allocation).unwrap();
        (buffer, allocation)
    }

    fn write_mapped(allocation: &HeadlessAllocation, data: &[u8]) {
        let ptr = allocation.mapped_ptr().unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().cast::<u8>(), data.len());
        }
    }

    #[test]
    fn test_copy_without_barrier_is_flagged() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        let (src, src_memory) = bound_buffer(&device, 16, MemoryLocation::CpuToGpu);
        let (dst, _dst_memory) = bound_buffer(&device, 16, MemoryLocation::GpuOnly);
        write_mapped(&src_memory, &[3; 16]);

        let mut recorder = device.begin_recording().unwrap();
        recorder.copy_buffer(
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            }],
        );
        device.submit(recorder).unwrap();
        let errors = device.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("without a transfer-write barrier"));
    }

    #[test]
    fn test_bracketed_copy_executes() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        let (src, src_memory) = bound_buffer(&device, 16, MemoryLocation::CpuToGpu);
        let (dst, _dst_memory) = bound_buffer(&device, 16, MemoryLocation::GpuOnly);
        write_mapped(&src_memory, &[3; 16]);

        let mut recorder = device.begin_recording().unwrap();
        recorder.pipeline_barrier(
            &[BufferBarrier::whole(dst, AccessScope::NONE, AccessScope::TRANSFER_WRITE)],
            &[],
        );
        recorder.copy_buffer(
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 8,
                dst_offset: 0,
                size: 8,
            }],
        );
        recorder.pipeline_barrier(
            &[BufferBarrier::whole(dst, AccessScope::TRANSFER_WRITE, AccessScope::TRANSFER_READ)],
            &[],
        );
        device.submit(recorder).unwrap();
        assert!(device.validation_errors().is_empty());
        let contents = device.read_buffer_memory(dst).unwrap();
        assert_eq!(&contents[..8], &[3; 8]);
        assert_eq!(&contents[8..], &[0; 8]);
        assert_eq!(device.submission_count(), 1);
        assert_eq!(device.open_recordings(), 0);
    }

    #[test]
    fn test_layout_mismatch_is_flagged() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        let descriptor = ImageDescriptor::new_2d(
            vk::Format::R8G8B8A8_UNORM,
            2,
            2,
            vk::ImageUsageFlags::SAMPLED,
        );
        let image = device
            .create_image(&descriptor, vk::ImageLayout::UNDEFINED)
            .unwrap();
        let mut recorder = device.begin_recording().unwrap();
        recorder.pipeline_barrier(
            &[],
            &[ImageBarrier {
                image,
                src: AccessScope::NONE,
                dst: AccessScope::TRANSFER_READ,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                subresource_range: descriptor.full_range(),
            }],
        );
        device.submit(recorder).unwrap();
        assert_eq!(device.validation_errors().len(), 1);
        assert_eq!(device.image_layout(image), Some(vk::ImageLayout::UNDEFINED));
    }

    #[test]
    fn test_double_destroy_is_flagged() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
        device.destroy_sampler(sampler);
        assert!(device.validation_errors().is_empty());
        device.destroy_sampler(sampler);
        assert_eq!(device.validation_errors().len(), 1);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_failed_submission_does_not_execute() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        device.fail_next_submission();
        let recorder = device.begin_recording().unwrap();
        let error = device.submit(recorder).unwrap_err();
        assert_eq!(
            error.downcast::<vk::Result>().unwrap(),
            vk::Result::ERROR_DEVICE_LOST
        );
        assert_eq!(device.submission_count(), 0);
        assert!(device.submit(device.begin_recording().unwrap()).is_ok());
    }

    #[test]
    fn test_recordings_own_their_pools() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        let recorders: Vec<HeadlessRecorder> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| device.begin_recording().unwrap()))
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect()
        });
        let pools: HashSet<vk::CommandPool> = recorders.iter().map(HeadlessRecorder::pool).collect();
        assert_eq!(pools.len(), 8);
        assert_eq!(device.live_command_pools(), 8);

        let mut recorders = recorders.into_iter();
        device.discard_recording(recorders.next().unwrap());
        for recorder in recorders {
            device.submit(recorder).unwrap();
        }
        assert_eq!(device.live_command_pools(), 0);
        assert_eq!(device.open_recordings(), 0);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_only_the_last_submission_is_kept() {
        let device = HeadlessDevice::new(HeadlessDeviceCreateInfo::default());
        assert!(device.last_submission().is_none());
        let mut first = device.begin_recording().unwrap();
        first.pipeline_barrier(&[], &[]);
        device.submit(first).unwrap();
        assert_eq!(device.last_submission().unwrap().len(), 1);
        device.submit(device.begin_recording().unwrap()).unwrap();
        assert!(device.last_submission().unwrap().is_empty());
        assert_eq!(device.submission_count(), 2);
    }
}
