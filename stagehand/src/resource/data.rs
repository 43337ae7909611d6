use ash::vk;

use crate::resource::ImageDescriptor;
use crate::util::{align, format};
use crate::StagehandError;

/// A contiguous run of bytes to place into a buffer.
///
/// Ranges are laid out back to back: each range starts where the previous one ended, rounded up
/// to its own alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDataRange<'a> {
    pub data: &'a [u8],
    pub alignment: Option<vk::DeviceSize>,
}

impl<'a> BufferDataRange<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            alignment: None,
        }
    }

    pub fn with_alignment(mut self, alignment: vk::DeviceSize) -> Self {
        self.alignment = Some(alignment);
        self
    }
}

/// Offsets of every range inside the destination plus the end of the last one
pub(crate) fn place_buffer_ranges(
    ranges: &[BufferDataRange<'_>],
) -> Result<(Vec<vk::DeviceSize>, vk::DeviceSize), StagehandError> {
    let mut offsets = Vec::with_capacity(ranges.len());
    let mut cursor: vk::DeviceSize = 0;
    for range in ranges {
        let alignment = range.alignment.unwrap_or(1);
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(StagehandError::invalid(format!(
                "data range alignment {alignment} is not a power of two"
            )));
        }
        let offset = align(cursor, alignment);
        offsets.push(offset);
        cursor = offset + range.data.len() as vk::DeviceSize;
    }
    Ok((offsets, cursor))
}

/// Texel data for one region of an image subresource range
#[derive(Debug, Clone, Copy)]
pub struct ImageDataRange<'a> {
    /// Tightly packed texels, layer after layer
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Texel offset of the region inside the mip level
    pub offset: [u32; 3],
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl<'a> ImageDataRange<'a> {
    /// A `width` x `height` region at the origin of layer 0, mip 0
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            depth: 1,
            offset: [0; 3],
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Region covering an entire mip level of every layer
    pub fn whole_level(data: &'a [u8], descriptor: &ImageDescriptor, mip_level: u32) -> Self {
        let extent = format::mip_extent(descriptor.extent(), mip_level);
        Self {
            data,
            width: extent.width,
            height: extent.height,
            depth: extent.depth,
            offset: [0; 3],
            mip_level,
            base_array_layer: 0,
            layer_count: descriptor.array_layers,
        }
    }

    pub fn with_mip_level(mut self, mip_level: u32) -> Self {
        self.mip_level = mip_level;
        self
    }

    pub fn with_layers(mut self, base_array_layer: u32, layer_count: u32) -> Self {
        self.base_array_layer = base_array_layer;
        self.layer_count = layer_count;
        self
    }

    pub fn with_offset(mut self, offset: [u32; 3]) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Bytes a single layer of the region occupies
    pub fn layer_size(&self, texel_size: u32) -> vk::DeviceSize {
        self.width as vk::DeviceSize
            * self.height as vk::DeviceSize
            * self.depth as vk::DeviceSize
            * texel_size as vk::DeviceSize
    }

    /// Exact number of bytes [`Self::data`] must hold
    pub fn required_size(&self, texel_size: u32) -> vk::DeviceSize {
        self.layer_size(texel_size) * self.layer_count as vk::DeviceSize
    }

    /// Check that the region addresses an existing part of the image and carries exactly enough
    /// bytes
    pub fn validate(&self, image: &ImageDescriptor) -> Result<(), StagehandError> {
        let texel_size = format::texel_size(image.format).ok_or_else(|| {
            StagehandError::invalid(format!(
                "format {:?} has no fixed texel size, initial data cannot be addressed",
                image.format
            ))
        })?;
        if self.mip_level >= image.mip_levels {
            return Err(StagehandError::invalid(format!(
                "data targets mip {} of an image with {} mips",
                self.mip_level, image.mip_levels
            )));
        }
        if self.layer_count == 0
            || self
                .base_array_layer
                .checked_add(self.layer_count)
                .map_or(true, |end| end > image.array_layers)
        {
            return Err(StagehandError::invalid(format!(
                "data targets layers {}..+{} of an image with {} layers",
                self.base_array_layer, self.layer_count, image.array_layers
            )));
        }
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(StagehandError::invalid("data region has a zero dimension"));
        }
        let mip = format::mip_extent(image.extent(), self.mip_level);
        let fits = |offset: u32, size: u32, limit: u32| {
            offset.checked_add(size).is_some_and(|end| end <= limit)
        };
        if !fits(self.offset[0], self.width, mip.width)
            || !fits(self.offset[1], self.height, mip.height)
            || !fits(self.offset[2], self.depth, mip.depth)
        {
            return Err(StagehandError::invalid(format!(
                "data region {}x{}x{} at {:?} exceeds mip {} extent {}x{}x{}",
                self.width,
                self.height,
                self.depth,
                self.offset,
                self.mip_level,
                mip.width,
                mip.height,
                mip.depth
            )));
        }
        let required = self.required_size(texel_size);
        if self.data.len() as vk::DeviceSize != required {
            return Err(StagehandError::invalid(format!(
                "data region needs exactly {required} bytes, got {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Copy region reading from `buffer_offset` of a tightly packed staging buffer
    pub(crate) fn copy_region(
        &self,
        aspect: vk::ImageAspectFlags,
        buffer_offset: vk::DeviceSize,
    ) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: self.mip_level,
                base_array_layer: self.base_array_layer,
                layer_count: self.layer_count,
            },
            image_offset: vk::Offset3D {
                x: self.offset[0] as i32,
                y: self.offset[1] as i32,
                z: self.offset[2] as i32,
            },
            image_extent: vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: self.depth,
            },
        }
    }
}
