use ash::vk;

use crate::util::format::{self, PackedImageLayout};
use crate::StagehandError;

/// Creation parameters of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl BufferDescriptor {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }

    pub fn validate(&self) -> Result<(), StagehandError> {
        if self.size == 0 {
            return Err(StagehandError::invalid("buffer size must be non-zero"));
        }
        if self.usage.is_empty() {
            return Err(StagehandError::invalid("buffer usage must not be empty"));
        }
        Ok(())
    }
}

/// Creation parameters of a texel buffer view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewDescriptor {
    pub format: vk::Format,
    pub offset: vk::DeviceSize,
    /// [`vk::WHOLE_SIZE`] covers everything past [`Self::offset`]
    pub range: vk::DeviceSize,
}

impl BufferViewDescriptor {
    pub fn new(format: vk::Format) -> Self {
        Self {
            format,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn validate(&self, buffer: &BufferDescriptor) -> Result<(), StagehandError> {
        if !buffer.usage.intersects(
            vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
        ) {
            return Err(StagehandError::invalid(
                "buffer views require a texel buffer usage",
            ));
        }
        if self.format == vk::Format::UNDEFINED {
            return Err(StagehandError::invalid("buffer view format is undefined"));
        }
        if self.offset >= buffer.size {
            return Err(StagehandError::invalid(format!(
                "buffer view offset {} is past the end of a {} byte buffer",
                self.offset, buffer.size
            )));
        }
        if self.range != vk::WHOLE_SIZE {
            let end = self.offset.checked_add(self.range);
            if self.range == 0 || end.map_or(true, |end| end > buffer.size) {
                return Err(StagehandError::invalid(format!(
                    "buffer view range {}..+{} does not fit a {} byte buffer",
                    self.offset, self.range, buffer.size
                )));
            }
        }
        Ok(())
    }
}

/// Creation parameters of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDescriptor {
    /// Single sampled, single mip, optimally tiled 2D image
    pub fn new_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Use the full mip chain of the current extent
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = format::max_mip_levels(self.extent());
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// Turns the image into a 3D image
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.image_type = vk::ImageType::TYPE_3D;
        self.depth = depth;
        self
    }

    pub fn with_tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format::aspect_flags(self.format)
    }

    /// Every mip and layer of the image
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// Tightly packed host layout, [`None`] if the format has no fixed texel size
    pub fn packed_layout(&self) -> Option<PackedImageLayout> {
        Some(PackedImageLayout {
            texel_size: format::texel_size(self.format)?,
            extent: self.extent(),
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
        })
    }

    pub fn validate(&self) -> Result<(), StagehandError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(StagehandError::invalid(format!(
                "image extent {}x{}x{} has a zero dimension",
                self.width, self.height, self.depth
            )));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(StagehandError::invalid(
                "images need at least one mip level and one array layer",
            ));
        }
        let max_mips = format::max_mip_levels(self.extent());
        if self.mip_levels > max_mips {
            return Err(StagehandError::invalid(format!(
                "{} mip levels requested, the extent only allows {max_mips}",
                self.mip_levels
            )));
        }
        if self.format == vk::Format::UNDEFINED {
            return Err(StagehandError::invalid("image format is undefined"));
        }
        if self.usage.is_empty() {
            return Err(StagehandError::invalid("image usage must not be empty"));
        }
        match self.image_type {
            vk::ImageType::TYPE_1D if self.height != 1 || self.depth != 1 => {
                return Err(StagehandError::invalid("1D images must have height and depth 1"));
            }
            vk::ImageType::TYPE_2D if self.depth != 1 => {
                return Err(StagehandError::invalid("2D images must have depth 1"));
            }
            vk::ImageType::TYPE_3D if self.array_layers != 1 => {
                return Err(StagehandError::invalid("3D images cannot be arrayed"));
            }
            vk::ImageType::TYPE_1D | vk::ImageType::TYPE_2D | vk::ImageType::TYPE_3D => {}
            other => {
                return Err(StagehandError::invalid(format!(
                    "unknown image type {other:?}"
                )))
            }
        }
        if self.samples.as_raw().count_ones() != 1 {
            return Err(StagehandError::invalid(
                "sample count must be exactly one power of two",
            ));
        }
        if self.samples != vk::SampleCountFlags::TYPE_1
            && (self.mip_levels != 1 || self.tiling != vk::ImageTiling::OPTIMAL)
        {
            return Err(StagehandError::invalid(
                "multisampled images must be optimally tiled with a single mip",
            ));
        }
        Ok(())
    }
}

/// Creation parameters of a sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescriptor {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    /// [`None`] disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
    /// [`None`] disables depth comparison
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
    pub unnormalized_coordinates: bool,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            unnormalized_coordinates: false,
        }
    }
}

impl SamplerDescriptor {
    pub fn validate(&self) -> Result<(), StagehandError> {
        if let Some(anisotropy) = self.max_anisotropy {
            if !(1.0..=16.0).contains(&anisotropy) {
                return Err(StagehandError::invalid(format!(
                    "max anisotropy {anisotropy} is outside 1.0..=16.0"
                )));
            }
        }
        if self.min_lod.is_nan() || self.max_lod.is_nan() || self.mip_lod_bias.is_nan() {
            return Err(StagehandError::invalid("sampler lod values must not be NaN"));
        }
        if self.min_lod > self.max_lod {
            return Err(StagehandError::invalid(format!(
                "min lod {} is greater than max lod {}",
                self.min_lod, self.max_lod
            )));
        }
        if self.unnormalized_coordinates
            && (self.min_filter != self.mag_filter
                || self.max_anisotropy.is_some()
                || self.compare_op.is_some())
        {
            return Err(StagehandError::invalid(
                "unnormalized samplers need matching filters, no anisotropy and no compare",
            ));
        }
        Ok(())
    }
}

/// Creation parameters of an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    pub view_type: vk::ImageViewType,
    /// [`None`] reuses the image's format
    pub format: Option<vk::Format>,
    pub base_mip_level: u32,
    /// [`vk::REMAINING_MIP_LEVELS`] covers every level past the base
    pub level_count: u32,
    pub base_array_layer: u32,
    /// [`vk::REMAINING_ARRAY_LAYERS`] covers every layer past the base
    pub layer_count: u32,
    /// [`None`] derives the aspect from the format
    pub aspect: Option<vk::ImageAspectFlags>,
}

impl Default for ImageViewDescriptor {
    fn default() -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format: None,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
            aspect: None,
        }
    }
}

/// An image view fully resolved against its image
#[derive(Debug, Clone, Copy)]
pub struct ResolvedImageView {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageViewDescriptor {
    pub fn new(view_type: vk::ImageViewType) -> Self {
        Self {
            view_type,
            ..Default::default()
        }
    }

    /// Check the view against its image and fill in every defaulted parameter
    pub fn resolve(&self, image: &ImageDescriptor) -> Result<ResolvedImageView, StagehandError> {
        let format = self.format.unwrap_or(image.format);
        if format == vk::Format::UNDEFINED {
            return Err(StagehandError::invalid("image view format is undefined"));
        }
        let aspect = self.aspect.unwrap_or_else(|| format::aspect_flags(format));
        if aspect.is_empty() || !image.aspect().contains(aspect) {
            return Err(StagehandError::invalid(format!(
                "aspect {aspect:?} is not present in an image of format {:?}",
                image.format
            )));
        }

        if self.base_mip_level >= image.mip_levels {
            return Err(StagehandError::invalid(format!(
                "base mip level {} is out of range for {} mips",
                self.base_mip_level, image.mip_levels
            )));
        }
        let level_count = match self.level_count {
            vk::REMAINING_MIP_LEVELS => image.mip_levels - self.base_mip_level,
            0 => return Err(StagehandError::invalid("image view level count is zero")),
            count if self.base_mip_level + count > image.mip_levels => {
                return Err(StagehandError::invalid(format!(
                    "mip levels {}..{} exceed the image's {} mips",
                    self.base_mip_level,
                    self.base_mip_level + count,
                    image.mip_levels
                )))
            }
            count => count,
        };

        if self.base_array_layer >= image.array_layers {
            return Err(StagehandError::invalid(format!(
                "base array layer {} is out of range for {} layers",
                self.base_array_layer, image.array_layers
            )));
        }
        let layer_count = match self.layer_count {
            vk::REMAINING_ARRAY_LAYERS => image.array_layers - self.base_array_layer,
            0 => return Err(StagehandError::invalid("image view layer count is zero")),
            count if self.base_array_layer + count > image.array_layers => {
                return Err(StagehandError::invalid(format!(
                    "array layers {}..{} exceed the image's {} layers",
                    self.base_array_layer,
                    self.base_array_layer + count,
                    image.array_layers
                )))
            }
            count => count,
        };

        let compatible = match self.view_type {
            vk::ImageViewType::TYPE_1D => {
                image.image_type == vk::ImageType::TYPE_1D && layer_count == 1
            }
            vk::ImageViewType::TYPE_1D_ARRAY => image.image_type == vk::ImageType::TYPE_1D,
            vk::ImageViewType::TYPE_2D => {
                image.image_type == vk::ImageType::TYPE_2D && layer_count == 1
            }
            vk::ImageViewType::TYPE_2D_ARRAY => image.image_type == vk::ImageType::TYPE_2D,
            vk::ImageViewType::TYPE_3D => image.image_type == vk::ImageType::TYPE_3D,
            vk::ImageViewType::CUBE => {
                image.image_type == vk::ImageType::TYPE_2D
                    && image.width == image.height
                    && layer_count == 6
            }
            vk::ImageViewType::CUBE_ARRAY => {
                image.image_type == vk::ImageType::TYPE_2D
                    && image.width == image.height
                    && layer_count % 6 == 0
            }
            _ => false,
        };
        if !compatible {
            return Err(StagehandError::invalid(format!(
                "view type {:?} over {layer_count} layers is incompatible with a {:?} image",
                self.view_type, image.image_type
            )));
        }

        Ok(ResolvedImageView {
            view_type: self.view_type,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: self.base_mip_level,
                level_count,
                base_array_layer: self.base_array_layer,
                layer_count,
            },
        })
    }
}

/// Full creation parameters of any resource, kept for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceDescriptor {
    Buffer(BufferDescriptor),
    Image(ImageDescriptor),
    Sampler(SamplerDescriptor),
}

/// Creation parameters of a resource's view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDescriptor {
    Buffer(BufferViewDescriptor),
    Image(ImageViewDescriptor),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_validation() {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        assert!(BufferDescriptor::new(64, usage).validate().is_ok());
        assert!(matches!(
            BufferDescriptor::new(0, usage).validate(),
            Err(StagehandError::InvalidDescriptor(_))
        ));
        assert!(BufferDescriptor::new(64, vk::BufferUsageFlags::empty())
            .validate()
            .is_err());
    }

    #[test]
    fn test_buffer_view_bounds() {
        let buffer = BufferDescriptor::new(256, vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER);
        let mut view = BufferViewDescriptor::new(vk::Format::R32_SFLOAT);
        assert!(view.validate(&buffer).is_ok());
        view.offset = 128;
        view.range = 128;
        assert!(view.validate(&buffer).is_ok());
        view.range = 129;
        assert!(view.validate(&buffer).is_err());
        view.range = 0;
        assert!(view.validate(&buffer).is_err());

        let plain = BufferDescriptor::new(256, vk::BufferUsageFlags::STORAGE_BUFFER);
        assert!(BufferViewDescriptor::new(vk::Format::R32_SFLOAT)
            .validate(&plain)
            .is_err());
    }

    #[test]
    fn test_image_validation() {
        let usage = vk::ImageUsageFlags::SAMPLED;
        let image = ImageDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4, usage);
        assert!(image.validate().is_ok());
        assert!(image.with_mip_levels(3).validate().is_ok());
        assert!(image.with_mip_levels(4).validate().is_err());
        assert!(image.with_mip_levels(0).validate().is_err());
        assert!(image.with_array_layers(0).validate().is_err());
        assert!(ImageDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 0, 4, usage)
            .validate()
            .is_err());
        assert!(ImageDescriptor::new_2d(vk::Format::UNDEFINED, 4, 4, usage)
            .validate()
            .is_err());
        assert!(image
            .with_samples(vk::SampleCountFlags::TYPE_4)
            .with_mip_levels(2)
            .validate()
            .is_err());
        assert!(image.with_depth(4).with_array_layers(2).validate().is_err());
        assert_eq!(image.with_full_mip_chain().mip_levels, 3);
    }

    #[test]
    fn test_sampler_validation() {
        assert!(SamplerDescriptor::default().validate().is_ok());
        let anisotropic = SamplerDescriptor {
            max_anisotropy: Some(32.0),
            ..Default::default()
        };
        assert!(anisotropic.validate().is_err());
        let inverted = SamplerDescriptor {
            min_lod: 4.0,
            max_lod: 1.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_image_view_resolution() {
        let image = ImageDescriptor::new_2d(
            vk::Format::R8G8B8A8_UNORM,
            8,
            8,
            vk::ImageUsageFlags::SAMPLED,
        )
        .with_mip_levels(4)
        .with_array_layers(6);

        let cube = ImageViewDescriptor::new(vk::ImageViewType::CUBE)
            .resolve(&image)
            .unwrap();
        assert_eq!(cube.subresource_range.layer_count, 6);
        assert_eq!(cube.subresource_range.level_count, 4);
        assert_eq!(cube.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(cube.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);

        let single = ImageViewDescriptor {
            base_mip_level: 2,
            layer_count: 1,
            ..Default::default()
        };
        let resolved = single.resolve(&image).unwrap();
        assert_eq!(resolved.subresource_range.level_count, 2);

        // a plain 2D view over six layers is not allowed
        assert!(ImageViewDescriptor::default().resolve(&image).is_err());
        let out_of_range = ImageViewDescriptor {
            base_mip_level: 4,
            ..Default::default()
        };
        assert!(out_of_range.resolve(&image).is_err());
        let depth = ImageViewDescriptor {
            aspect: Some(vk::ImageAspectFlags::DEPTH),
            layer_count: 1,
            ..Default::default()
        };
        assert!(depth.resolve(&image).is_err());
    }
}
