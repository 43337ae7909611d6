mod common;

use stagehand::prelude::*;

use common::*;

#[test]
fn test_readback_needs_transfer_src() {
    let TestManager { manager, .. } = default_manager();
    let bytes = [1u8; 8];
    let handle = manager
        .create_buffer(
            BufferCreateInfo::new(
                BufferDescriptor::new(
                    8,
                    vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                ),
                MemoryLocation::GpuOnly,
            )
            .data(&[BufferDataRange::new(&bytes)]),
        )
        .unwrap();
    manager.complete_transfers().unwrap();
    assert!(matches!(
        manager.read_buffer(handle),
        Err(StagehandError::InvalidDescriptor(_))
    ));
}

#[test]
fn test_readback_of_wrong_kind_or_dead_handle() {
    let TestManager { manager, .. } = default_manager();
    let sampler = manager
        .create_sampler(SamplerCreateInfo::new(SamplerDescriptor::default()))
        .unwrap();
    assert!(matches!(
        manager.read_buffer(sampler),
        Err(StagehandError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        manager.read_image(sampler, 0, 0),
        Err(StagehandError::InvalidDescriptor(_))
    ));
    manager.destroy_resource(sampler).unwrap();
    assert_eq!(manager.read_buffer(sampler), Err(StagehandError::NotFound));
}

#[test]
fn test_undefined_image_cannot_be_read() {
    let TestManager { device, manager } = default_manager();
    let handle = manager
        .create_image(ImageCreateInfo::new(
            sampled_rgba(4, 4),
            MemoryLocation::GpuOnly,
        ))
        .unwrap();
    assert!(matches!(
        manager.read_image(handle, 0, 0),
        Err(StagehandError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        manager.read_image(handle, 1, 0),
        Err(StagehandError::InvalidDescriptor(_))
    ));
    assert_eq!(device.submission_count(), 0);
}

#[test]
fn test_image_readback_keeps_other_layers() {
    let TestManager { device, manager } = default_manager();
    let descriptor = sampled_rgba(2, 2).with_array_layers(2);
    let first = [1u8; 16];
    let second = [2u8; 16];
    let handle = manager
        .create_image(
            ImageCreateInfo::new(descriptor, MemoryLocation::GpuOnly).data(&[
                ImageDataRange::new(&first, 2, 2),
                ImageDataRange::new(&second, 2, 2).with_layers(1, 1),
            ]),
        )
        .unwrap();
    manager.complete_transfers().unwrap();

    assert_eq!(manager.read_image(handle, 0, 1).unwrap(), second.to_vec());
    assert_eq!(manager.read_image(handle, 0, 0).unwrap(), first.to_vec());
    let image = manager.lookup(handle).unwrap().image().unwrap();
    assert_eq!(
        device.image_layout(image),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );
    // readbacks are immediate submissions outside of any batch
    assert_eq!(manager.submissions(), 1);
    assert_eq!(device.submission_count(), 3);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn test_readback_leaves_no_staging_behind() {
    let TestManager { device, manager } = default_manager();
    let bytes = [8u8; 32];
    let handle = manager
        .create_buffer(
            BufferCreateInfo::new(vertex_buffer(32), MemoryLocation::GpuOnly)
                .data(&[BufferDataRange::new(&bytes)]),
        )
        .unwrap();
    manager.complete_transfers().unwrap();
    let before = device.allocator().live_allocations();

    assert_eq!(manager.read_buffer(handle).unwrap(), bytes.to_vec());
    assert_eq!(device.allocator().live_allocations(), before);
    assert!(!manager.has_pending_transfer(handle).unwrap());
}
