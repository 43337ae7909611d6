mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rand::Rng;
use stagehand::prelude::*;

use common::*;

const THREADS: usize = 8;
const PER_THREAD: usize = 32;

fn contents(thread: usize, index: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (thread * 31 + index * 7 + i) as u8)
        .collect()
}

#[test]
fn test_concurrent_creation_while_flushing() {
    let TestManager { device, manager } = default_manager();
    let done = AtomicBool::new(false);

    let created: Vec<(RecordHandle, Vec<u8>)> = thread::scope(|scope| {
        // a tick loop flushing whatever has been recorded so far
        let ticker = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if let Some(completed) = manager.complete_transfers() {
                    assert!(completed.outcome.is_ok());
                }
                thread::yield_now();
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|thread| {
                let manager = &manager;
                scope.spawn(move || {
                    let mut rng = rand::rng();
                    (0..PER_THREAD)
                        .map(|index| {
                            let len = rng.random_range(1..=512usize);
                            let data = contents(thread, index, len);
                            let handle = manager
                                .create_buffer(
                                    BufferCreateInfo::new(
                                        vertex_buffer(len as vk::DeviceSize),
                                        MemoryLocation::GpuOnly,
                                    )
                                    .data(&[BufferDataRange::new(&data)]),
                                )
                                .unwrap();
                            (handle, data)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let created = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        done.store(true, Ordering::Release);
        ticker.join().unwrap();
        created
    });
    manager.complete_transfers();

    let unique: HashSet<RecordHandle> = created.iter().map(|(handle, _)| *handle).collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
    assert_eq!(manager.live_count(), THREADS * PER_THREAD);
    for (handle, data) in &created {
        let record = manager.lookup(*handle).unwrap();
        assert_eq!(record.kind(), ResourceKind::Buffer);
        assert_eq!(&manager.read_buffer(*handle).unwrap(), data);
    }
    assert_eq!(manager.live_staging_buffers(), 0);
    assert_eq!(device.open_recordings(), 0);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn test_concurrent_create_and_destroy() {
    let TestManager { device, manager } = default_manager();

    thread::scope(|scope| {
        for thread in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                for index in 0..PER_THREAD {
                    let data = contents(thread, index, 64);
                    let buffer = manager
                        .create_buffer(
                            BufferCreateInfo::new(vertex_buffer(64), MemoryLocation::GpuOnly)
                                .data(&[BufferDataRange::new(&data)]),
                        )
                        .unwrap();
                    let sampler = manager
                        .create_sampler(SamplerCreateInfo::new(SamplerDescriptor::default()))
                        .unwrap();
                    manager.destroy_resource(sampler).unwrap();
                    // the buffer may still be waiting on its copy
                    manager.destroy_resource(buffer).unwrap();
                    if index % 8 == 0 {
                        manager.complete_transfers();
                    }
                }
            });
        }
    });
    manager.complete_transfers();

    assert_eq!(manager.live_count(), 0);
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.allocator().live_allocations(), 0);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn test_destroy_all_while_creating() {
    let TestManager { device, manager } = default_manager();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        // invalidation events arriving while workers keep streaming data in
        let invalidator = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                manager.destroy_all();
                thread::yield_now();
            }
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let manager = &manager;
                scope.spawn(move || {
                    for _ in 0..PER_THREAD * 4 {
                        manager
                            .create_buffer(
                                BufferCreateInfo::new(vertex_buffer(64), MemoryLocation::GpuOnly)
                                    .data(&[BufferDataRange::new(&[0xAB; 64])]),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        invalidator.join().unwrap();
    });
    manager.complete_transfers();
    manager.destroy_all();

    assert!(device.validation_errors().is_empty());
    assert_eq!(manager.live_count(), 0);
    assert_eq!(manager.live_staging_buffers(), 0);
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.allocator().live_allocations(), 0);
}

#[test]
fn test_host_access_while_destroying() {
    let TestManager { device, manager } = default_manager();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let invalidator = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                manager.destroy_all();
                thread::yield_now();
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|thread| {
                let manager = &manager;
                scope.spawn(move || {
                    for index in 0..PER_THREAD {
                        let data = contents(thread, index, 256);
                        let handle = manager
                            .create_buffer(
                                BufferCreateInfo::new(
                                    BufferDescriptor::new(256, vk::BufferUsageFlags::UNIFORM_BUFFER),
                                    MemoryLocation::CpuToGpu,
                                )
                                .data(&[BufferDataRange::new(&data)]),
                            )
                            .unwrap();
                        // any of these may lose the race against destroy_all
                        match manager.write_buffer(handle, 0, &data[..128]) {
                            Ok(()) | Err(StagehandError::NotFound) => {}
                            Err(error) => panic!("write failed: {error}"),
                        }
                        match manager.read_buffer(handle) {
                            Ok(read) => assert_eq!(read, data),
                            Err(StagehandError::NotFound) => {}
                            Err(error) => panic!("read failed: {error}"),
                        }
                        manager.destroy_resource(handle).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        invalidator.join().unwrap();
    });

    assert!(device.validation_errors().is_empty());
    assert_eq!(manager.live_count(), 0);
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.allocator().live_allocations(), 0);
}
