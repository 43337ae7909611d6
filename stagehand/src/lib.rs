//! Lifetime management for GPU buffers, images and samplers, with their initial contents uploaded
//! through batched staging copies.
//!
//! A [`manager::ResourceManager`] is built on top of anything implementing [`device::Device`].
//! The `headless` feature provides a software device that runs every transfer on host memory, the
//! `vulkan` feature drives a real queue through ash and gpu-allocator.
pub mod allocators;
pub mod concurrency;
pub mod device;
pub mod diagnostics;
pub mod error;
#[cfg(feature = "headless")]
pub mod headless;
pub mod manager;
pub mod prelude;
pub mod registry;
pub mod resource;
pub mod traits;
pub mod transfer;
pub mod upload;
pub mod usage;
pub mod util;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use error::StagehandError;

// Re-exports
pub use ash;
#[cfg(feature = "vulkan")]
pub use gpu_allocator;
