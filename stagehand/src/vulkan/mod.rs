//! [`Device`](crate::device::Device) implementation on top of [`ash`] and [`gpu_allocator`]

pub mod device;
pub mod recorder;

pub use device::{VulkanDevice, VulkanDeviceCreateInfo, VulkanSubmission};
pub use recorder::VulkanRecorder;
