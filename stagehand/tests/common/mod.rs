#![allow(dead_code)]
//! Quick utility stuff for tests
use std::sync::Arc;

use stagehand::prelude::*;

/// Logs go to the test writer, so `cargo test -- --nocapture` shows them
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub struct TestManager {
    pub device: Arc<HeadlessDevice>,
    pub manager: ResourceManager<HeadlessDevice>,
}

/// A manager on a fresh headless device
pub fn create_manager(create_info: ResourceManagerCreateInfo) -> TestManager {
    create_manager_on(HeadlessDeviceCreateInfo::default(), create_info)
}

pub fn create_manager_on(
    device_info: HeadlessDeviceCreateInfo,
    create_info: ResourceManagerCreateInfo,
) -> TestManager {
    init_logging();
    let device = Arc::new(HeadlessDevice::new(device_info));
    let manager = ResourceManager::new(device.clone(), create_info).unwrap();
    TestManager { device, manager }
}

pub fn default_manager() -> TestManager {
    create_manager(ResourceManagerCreateInfo {
        name: String::from("test manager"),
        ..Default::default()
    })
}

/// Everything the manager reported so far
pub fn drain_diagnostics(manager: &ResourceManager<HeadlessDevice>) -> Vec<Diagnostic> {
    manager.diagnostics().try_iter().collect()
}

pub fn sampled_rgba(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        vk::Format::R8G8B8A8_UNORM,
        width,
        height,
        vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC,
    )
}

pub fn vertex_buffer(size: vk::DeviceSize) -> BufferDescriptor {
    BufferDescriptor::new(
        size,
        vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
    )
}
