use ash::vk;

/// Utilities to help with Vulkan formats

/// Size in bytes of a single texel, [`None`] for block-compressed, combined depth/stencil or
/// unknown formats
pub fn texel_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R4G4_UNORM_PACK8
        | vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_USCALED
        | vk::Format::R8_SSCALED
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB
        | vk::Format::S8_UINT => 1,
        vk::Format::R4G4B4A4_UNORM_PACK16
        | vk::Format::B4G4R4A4_UNORM_PACK16
        | vk::Format::R5G6B5_UNORM_PACK16
        | vk::Format::B5G6R5_UNORM_PACK16
        | vk::Format::R5G5B5A1_UNORM_PACK16
        | vk::Format::B5G5R5A1_UNORM_PACK16
        | vk::Format::A1R5G5B5_UNORM_PACK16
        | vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_USCALED
        | vk::Format::R8G8_SSCALED
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R8G8_SRGB
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT
        | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8_UNORM
        | vk::Format::R8G8B8_SNORM
        | vk::Format::R8G8B8_UINT
        | vk::Format::R8G8B8_SINT
        | vk::Format::R8G8B8_SRGB
        | vk::Format::B8G8R8_UNORM
        | vk::Format::B8G8R8_SNORM
        | vk::Format::B8G8R8_UINT
        | vk::Format::B8G8R8_SINT
        | vk::Format::B8G8R8_SRGB => 3,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_USCALED
        | vk::Format::R8G8B8A8_SSCALED
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SNORM
        | vk::Format::B8G8R8A8_UINT
        | vk::Format::B8G8R8A8_SINT
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A8B8G8R8_UNORM_PACK32
        | vk::Format::A8B8G8R8_SNORM_PACK32
        | vk::Format::A8B8G8R8_UINT_PACK32
        | vk::Format::A8B8G8R8_SINT_PACK32
        | vk::Format::A8B8G8R8_SRGB_PACK32
        | vk::Format::A2R10G10B10_UNORM_PACK32
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::E5B9G9R9_UFLOAT_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SNORM
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32 => 4,
        vk::Format::R16G16B16_UNORM
        | vk::Format::R16G16B16_SNORM
        | vk::Format::R16G16B16_UINT
        | vk::Format::R16G16B16_SINT
        | vk::Format::R16G16B16_SFLOAT => 6,
        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SNORM
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT
        | vk::Format::R32G32_SFLOAT
        | vk::Format::R64_UINT
        | vk::Format::R64_SINT
        | vk::Format::R64_SFLOAT => 8,
        vk::Format::R32G32B32_UINT | vk::Format::R32G32B32_SINT | vk::Format::R32G32B32_SFLOAT => 12,
        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R64G64_UINT
        | vk::Format::R64G64_SINT
        | vk::Format::R64G64_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// Aspects present in a format
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Extent of a mip level; every dimension is clamped to at least one texel
pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |dimension: u32| dimension.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(extent.width),
        height: shrink(extent.height),
        depth: shrink(extent.depth),
    }
}

/// Length of the full mip chain of an extent
pub fn max_mip_levels(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Tightly packed layout of an image: mips are stored one after another, each holding its array
/// layers back to back, rows with no padding
#[derive(Debug, Clone, Copy)]
pub struct PackedImageLayout {
    pub texel_size: u32,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl PackedImageLayout {
    fn layer_size(&self, mip_level: u32) -> vk::DeviceSize {
        let extent = mip_extent(self.extent, mip_level);
        extent.width as vk::DeviceSize
            * extent.height as vk::DeviceSize
            * extent.depth as vk::DeviceSize
            * self.texel_size as vk::DeviceSize
    }

    pub fn size(&self) -> vk::DeviceSize {
        (0..self.mip_levels)
            .map(|level| self.layer_size(level) * self.array_layers as vk::DeviceSize)
            .sum()
    }

    pub fn subresource(&self, mip_level: u32, array_layer: u32) -> vk::SubresourceLayout {
        let mip_offset: vk::DeviceSize = (0..mip_level)
            .map(|level| self.layer_size(level) * self.array_layers as vk::DeviceSize)
            .sum();
        let extent = mip_extent(self.extent, mip_level);
        let row_pitch = extent.width as vk::DeviceSize * self.texel_size as vk::DeviceSize;
        let depth_pitch = row_pitch * extent.height as vk::DeviceSize;
        let layer_size = self.layer_size(mip_level);
        vk::SubresourceLayout {
            offset: mip_offset + layer_size * array_layer as vk::DeviceSize,
            size: layer_size,
            row_pitch,
            array_pitch: layer_size,
            depth_pitch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::D16_UNORM), Some(2));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
        assert_eq!(texel_size(vk::Format::D24_UNORM_S8_UINT), None);
    }

    #[test]
    fn test_aspects() {
        assert_eq!(aspect_flags(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_flags(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_mip_chain() {
        let extent = vk::Extent3D {
            width: 16,
            height: 4,
            depth: 1,
        };
        assert_eq!(max_mip_levels(extent), 5);
        let smallest = mip_extent(extent, 4);
        assert_eq!((smallest.width, smallest.height, smallest.depth), (1, 1, 1));
        assert_eq!(mip_extent(extent, 40).width, 1);
    }

    #[test]
    fn test_packed_layout() {
        let layout = PackedImageLayout {
            texel_size: 4,
            extent: vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            },
            mip_levels: 2,
            array_layers: 2,
        };
        // mip 0: 2 layers * 64 bytes, mip 1: 2 layers * 16 bytes
        assert_eq!(layout.size(), 160);
        let mip1_layer1 = layout.subresource(1, 1);
        assert_eq!(mip1_layer1.offset, 128 + 16);
        assert_eq!(mip1_layer1.row_pitch, 8);
        assert_eq!(mip1_layer1.size, 16);
    }
}
