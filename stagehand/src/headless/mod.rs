//! A device with no GPU behind it.
//!
//! Memory lives on the host and submissions execute immediately on the calling thread. The device
//! mirrors enough of Vulkan's rules (layouts, barriers, mapped ranges) that code which is correct
//! against it is correct against a real queue.

pub mod device;
pub mod memory;
pub mod recorder;

pub use device::{HeadlessDevice, HeadlessDeviceCreateInfo, HeadlessSubmission};
pub use memory::{HeadlessAllocation, HeadlessAllocator};
pub use recorder::{HeadlessCommand, HeadlessRecorder};
