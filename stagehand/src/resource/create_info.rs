use crate::allocators::MemoryLocation;
use crate::resource::{
    BufferDataRange, BufferDescriptor, BufferViewDescriptor, ImageDataRange, ImageDescriptor,
    ImageViewDescriptor, SamplerDescriptor, UserTag,
};

/// Everything needed to create a buffer
#[derive(Debug, Clone)]
pub struct BufferCreateInfo<'a> {
    pub descriptor: BufferDescriptor,
    pub view: Option<BufferViewDescriptor>,
    /// Initial contents, may be empty
    pub data: &'a [BufferDataRange<'a>],
    pub location: MemoryLocation,
    pub name: Option<&'a str>,
    pub user_tag: Option<UserTag>,
}

impl<'a> BufferCreateInfo<'a> {
    pub fn new(descriptor: BufferDescriptor, location: MemoryLocation) -> Self {
        Self {
            descriptor,
            view: None,
            data: &[],
            location,
            name: None,
            user_tag: None,
        }
    }

    pub fn view(mut self, view: BufferViewDescriptor) -> Self {
        self.view = Some(view);
        self
    }

    pub fn data(mut self, data: &'a [BufferDataRange<'a>]) -> Self {
        self.data = data;
        self
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn user_tag(mut self, user_tag: UserTag) -> Self {
        self.user_tag = Some(user_tag);
        self
    }
}

/// Everything needed to create an image
#[derive(Debug, Clone)]
pub struct ImageCreateInfo<'a> {
    pub descriptor: ImageDescriptor,
    pub view: Option<ImageViewDescriptor>,
    pub data: &'a [ImageDataRange<'a>],
    pub location: MemoryLocation,
    pub name: Option<&'a str>,
    pub user_tag: Option<UserTag>,
}

impl<'a> ImageCreateInfo<'a> {
    pub fn new(descriptor: ImageDescriptor, location: MemoryLocation) -> Self {
        Self {
            descriptor,
            view: None,
            data: &[],
            location,
            name: None,
            user_tag: None,
        }
    }

    pub fn view(mut self, view: ImageViewDescriptor) -> Self {
        self.view = Some(view);
        self
    }

    pub fn data(mut self, data: &'a [ImageDataRange<'a>]) -> Self {
        self.data = data;
        self
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn user_tag(mut self, user_tag: UserTag) -> Self {
        self.user_tag = Some(user_tag);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SamplerCreateInfo<'a> {
    pub descriptor: SamplerDescriptor,
    pub name: Option<&'a str>,
    pub user_tag: Option<UserTag>,
}

impl<'a> SamplerCreateInfo<'a> {
    pub fn new(descriptor: SamplerDescriptor) -> Self {
        Self {
            descriptor,
            name: None,
            user_tag: None,
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn user_tag(mut self, user_tag: UserTag) -> Self {
        self.user_tag = Some(user_tag);
        self
    }
}
