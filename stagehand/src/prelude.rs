pub use crate::allocators::{Allocation, Allocator, MemoryLocation};
pub use crate::device::{AccessScope, Device, QueueInfo, TransferRecorder};
pub use crate::diagnostics::Diagnostic;
pub use crate::manager::{LeakPolicy, ResourceManager, ResourceManagerCreateInfo};
pub use crate::registry::{PendingDestroyPolicy, RecordHandle};
pub use crate::resource::*;
pub use crate::transfer::{CompletedBatch, TransferState};
pub use crate::StagehandError;

#[cfg(feature = "headless")]
pub use crate::headless::{HeadlessDevice, HeadlessDeviceCreateInfo};
#[cfg(feature = "vulkan")]
pub use crate::vulkan::{VulkanDevice, VulkanDeviceCreateInfo};

pub use ash::vk;
