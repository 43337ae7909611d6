use ash::vk;
use ash::vk::Handle;

use crate::allocators::{Allocation, MemoryLocation};
use crate::resource::{ResourceDescriptor, ViewDescriptor};

/// Kind of resource a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    Sampler,
    /// Reported for handles that are not live
    Invalid,
}

/// Opaque pointer-sized value callers can attach to a resource; never interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserTag(pub usize);

/// Native object backing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeHandle {
    Buffer(vk::Buffer),
    Image(vk::Image),
    Sampler(vk::Sampler),
}

impl NativeHandle {
    pub fn kind(&self) -> ResourceKind {
        match self {
            NativeHandle::Buffer(_) => ResourceKind::Buffer,
            NativeHandle::Image(_) => ResourceKind::Image,
            NativeHandle::Sampler(_) => ResourceKind::Sampler,
        }
    }

    /// Raw 64-bit value of the native object
    pub fn as_raw(&self) -> u64 {
        match self {
            NativeHandle::Buffer(buffer) => buffer.as_raw(),
            NativeHandle::Image(image) => image.as_raw(),
            NativeHandle::Sampler(sampler) => sampler.as_raw(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeView {
    Buffer(vk::BufferView),
    Image(vk::ImageView),
}

impl NativeView {
    pub fn as_raw(&self) -> u64 {
        match self {
            NativeView::Buffer(view) => view.as_raw(),
            NativeView::Image(view) => view.as_raw(),
        }
    }
}

/// Region of allocator memory a resource is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBinding {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub location: MemoryLocation,
}

impl MemoryBinding {
    pub(crate) fn new<A: Allocation>(allocation: &A, location: MemoryLocation) -> Self {
        Self {
            memory: allocation.memory(),
            offset: allocation.offset(),
            size: allocation.size(),
            location,
        }
    }

    pub fn is_host_visible(&self) -> bool {
        self.location.is_host_visible()
    }
}

/// Canonical description of one live resource
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub(crate) handle: NativeHandle,
    pub(crate) descriptor: ResourceDescriptor,
    pub(crate) view: Option<NativeView>,
    pub(crate) view_descriptor: Option<ViewDescriptor>,
    pub(crate) name: Option<String>,
    pub(crate) user_tag: Option<UserTag>,
    pub(crate) binding: Option<MemoryBinding>,
    /// Layout of every subresource, images only
    pub(crate) layout: Option<vk::ImageLayout>,
}

impl ResourceRecord {
    pub fn kind(&self) -> ResourceKind {
        self.handle.kind()
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn view(&self) -> Option<NativeView> {
        self.view
    }

    pub fn view_descriptor(&self) -> Option<&ViewDescriptor> {
        self.view_descriptor.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn user_tag(&self) -> Option<UserTag> {
        self.user_tag
    }

    pub fn binding(&self) -> Option<&MemoryBinding> {
        self.binding.as_ref()
    }

    /// Current layout if this is an image
    pub fn layout(&self) -> Option<vk::ImageLayout> {
        self.layout
    }

    pub fn buffer(&self) -> Option<vk::Buffer> {
        match self.handle {
            NativeHandle::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<vk::Image> {
        match self.handle {
            NativeHandle::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        match self.handle {
            NativeHandle::Sampler(sampler) => Some(sampler),
            _ => None,
        }
    }

    /// Label used in logs
    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SamplerDescriptor;

    #[test]
    fn test_kind_follows_handle() {
        let record = ResourceRecord {
            handle: NativeHandle::Sampler(vk::Sampler::from_raw(7)),
            descriptor: ResourceDescriptor::Sampler(SamplerDescriptor::default()),
            view: None,
            view_descriptor: None,
            name: None,
            user_tag: Some(UserTag(0xdead)),
            binding: None,
            layout: None,
        };
        assert_eq!(record.kind(), ResourceKind::Sampler);
        assert_eq!(record.handle().as_raw(), 7);
        assert_eq!(record.sampler(), Some(vk::Sampler::from_raw(7)));
        assert_eq!(record.buffer(), None);
        assert_eq!(record.label(), "unnamed");
        assert_eq!(record.user_tag(), Some(UserTag(0xdead)));
    }
}
