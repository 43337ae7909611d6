use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;

use crate::concurrency::SpinLock;
use crate::device::{AccessScope, BufferBarrier, Device, ImageBarrier, TransferRecorder};
use crate::registry::RecordHandle;
use crate::upload::{UploadBuffer, UploadBufferPool};
use crate::StagehandError;

/// Where the engine is in its batch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransferState {
    /// No recording target exists
    Idle = 0,
    /// A batch is open and holds unsubmitted work
    Recording = 1,
    /// A batch has been handed to the queue and is being waited on
    Submitted = 2,
}

impl From<u8> for TransferState {
    fn from(value: u8) -> Self {
        match value {
            1 => TransferState::Recording,
            2 => TransferState::Submitted,
            _ => TransferState::Idle,
        }
    }
}

/// Destination of a recorded copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferTarget {
    Buffer(vk::Buffer),
    Image {
        image: vk::Image,
        /// Layout the image is left in after the copy
        final_layout: vk::ImageLayout,
    },
}

/// One staged copy into a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferRequest {
    pub destination: RecordHandle,
    pub target: TransferTarget,
    pub regions: usize,
    pub bytes: vk::DeviceSize,
}

impl TransferRequest {
    pub fn final_layout(&self) -> Option<vk::ImageLayout> {
        match self.target {
            TransferTarget::Buffer(_) => None,
            TransferTarget::Image { final_layout, .. } => Some(final_layout),
        }
    }
}

/// Work gathered between two flushes
pub struct TransferBatch<D: Device> {
    id: u64,
    recorder: D::Recorder,
    requests: VecDeque<TransferRequest>,
    bytes: vk::DeviceSize,
}

impl<D: Device> TransferBatch<D> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requests(&self) -> impl Iterator<Item = &TransferRequest> {
        self.requests.iter()
    }

    /// Copy staged bytes into a buffer.
    ///
    /// `before` is what may still be touching the buffer, `after` the access the copy hands over
    /// to.
    pub fn record_buffer_upload(
        &mut self,
        destination: RecordHandle,
        staging: &UploadBuffer<D>,
        buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
        before: AccessScope,
        after: AccessScope,
    ) {
        self.recorder.pipeline_barrier(
            &[BufferBarrier::whole(
                buffer,
                before,
                AccessScope::TRANSFER_WRITE,
            )],
            &[],
        );
        self.recorder.copy_buffer(staging.handle(), buffer, regions);
        self.recorder.pipeline_barrier(
            &[BufferBarrier::whole(
                buffer,
                AccessScope::TRANSFER_WRITE,
                after,
            )],
            &[],
        );

        let bytes = regions.iter().map(|region| region.size).sum();
        self.push(TransferRequest {
            destination,
            target: TransferTarget::Buffer(buffer),
            regions: regions.len(),
            bytes,
        });
    }

    /// Copy staged texels into an image, moving every subresource through
    /// `TRANSFER_DST_OPTIMAL` into `final_layout`
    #[allow(clippy::too_many_arguments)]
    pub fn record_image_upload(
        &mut self,
        destination: RecordHandle,
        staging: &UploadBuffer<D>,
        image: vk::Image,
        subresource_range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
        final_layout: vk::ImageLayout,
        after: AccessScope,
    ) {
        self.recorder.pipeline_barrier(
            &[],
            &[ImageBarrier {
                image,
                src: AccessScope::NONE,
                dst: AccessScope::TRANSFER_WRITE,
                old_layout,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                subresource_range,
            }],
        );
        self.recorder.copy_buffer_to_image(
            staging.handle(),
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
        self.recorder.pipeline_barrier(
            &[],
            &[ImageBarrier {
                image,
                src: AccessScope::TRANSFER_WRITE,
                dst: after,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: final_layout,
                subresource_range,
            }],
        );

        self.push(TransferRequest {
            destination,
            target: TransferTarget::Image {
                image,
                final_layout,
            },
            regions: regions.len(),
            bytes: staging.written(),
        });
    }

    fn push(&mut self, request: TransferRequest) {
        self.bytes += request.bytes;
        self.requests.push_back(request);
    }
}

/// Result of flushing one batch
#[derive(Debug)]
pub struct CompletedBatch {
    pub id: u64,
    /// Requests in the order they were recorded
    pub requests: Vec<TransferRequest>,
    pub bytes: vk::DeviceSize,
    /// Whether the batch was submitted and executed
    pub outcome: Result<(), StagehandError>,
}

/// Records staging copies into one shared command sequence and flushes it once per tick.
///
/// Recording is serialized by a spin lock held only while a caller appends its barriers and
/// copies. Creating the command sequence, submitting and waiting all happen outside of it.
/// Flushes are serialized among themselves so batches always complete in id order.
pub struct TransferEngine<D: Device> {
    device: Arc<D>,
    pool: UploadBufferPool<D>,
    batch: SpinLock<Option<TransferBatch<D>>>,
    flush: Mutex<()>,
    pending: AtomicBool,
    state: AtomicU8,
    next_batch: AtomicU64,
    submissions: AtomicU64,
    last_batch_bytes: AtomicU64,
    fence_timeout: u64,
}

impl<D: Device> std::fmt::Debug for TransferEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("state", &self.state())
            .field("pending", &self.has_pending_work())
            .field("submissions", &self.submissions())
            .field("pool", &self.pool)
            .finish()
    }
}

impl<D: Device> TransferEngine<D> {
    pub fn new(device: Arc<D>, fence_timeout: u64) -> Self {
        Self {
            pool: UploadBufferPool::new(device.clone()),
            device,
            batch: SpinLock::new(None),
            flush: Mutex::new(()),
            pending: AtomicBool::new(false),
            state: AtomicU8::new(TransferState::Idle as u8),
            next_batch: AtomicU64::new(1),
            submissions: AtomicU64::new(0),
            last_batch_bytes: AtomicU64::new(0),
            fence_timeout,
        }
    }

    pub fn pool(&self) -> &UploadBufferPool<D> {
        &self.pool
    }

    pub fn state(&self) -> TransferState {
        TransferState::from(self.state.load(Ordering::Acquire))
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of batches handed to the queue
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Nanoseconds a submitted batch is waited on
    pub fn fence_timeout(&self) -> u64 {
        self.fence_timeout
    }

    /// Bytes copied by the most recently submitted batch
    pub fn last_batch_bytes(&self) -> vk::DeviceSize {
        self.last_batch_bytes.load(Ordering::Relaxed)
    }

    /// Append work to the open batch, opening one if the engine is idle.
    ///
    /// `record` runs with the recording lock held and must only append commands.
    pub fn record<R>(
        &self,
        record: impl FnOnce(&mut TransferBatch<D>) -> R,
    ) -> Result<R, StagehandError> {
        let mut fresh: Option<D::Recorder> = None;
        loop {
            let mut guard = self.batch.lock();
            if guard.is_none() {
                if let Some(recorder) = fresh.take() {
                    *guard = Some(TransferBatch {
                        id: self.next_batch.fetch_add(1, Ordering::Relaxed),
                        recorder,
                        requests: VecDeque::new(),
                        bytes: 0,
                    });
                }
            }
            if let Some(batch) = guard.as_mut() {
                self.pending.store(true, Ordering::Release);
                self.state
                    .store(TransferState::Recording as u8, Ordering::Release);
                let output = record(batch);
                drop(guard);
                // another caller opened the batch first
                if let Some(unused) = fresh.take() {
                    self.device.discard_recording(unused);
                }
                return Ok(output);
            }
            drop(guard);
            // command sequences are created without holding the lock
            fresh = Some(
                self.device
                    .begin_recording()
                    .map_err(StagehandError::device)?,
            );
        }
    }

    /// Back to idle unless another caller already opened the next batch
    fn settle(&self) {
        let _ = self.state.compare_exchange(
            TransferState::Submitted as u8,
            TransferState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Close the open batch, if any
    fn take_batch(&self) -> Option<TransferBatch<D>> {
        let mut batch = self.batch.lock();
        let taken = batch.take();
        self.pending.store(false, Ordering::Release);
        if taken.is_some() {
            self.state
                .store(TransferState::Submitted as u8, Ordering::Release);
        }
        taken
    }

    /// Submit the open batch and wait for it, then release its staging memory.
    ///
    /// Without pending work this returns [`None`] and never touches the queue. The flush lock
    /// stays held through submission so batches reach the queue in id order. It is private to
    /// the engine and nothing holding it calls back into code that takes it.
    pub fn complete(&self) -> Option<CompletedBatch> {
        if !self.has_pending_work() {
            return None;
        }
        let _flush = self.flush.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = self.take_batch()?;
        let TransferBatch {
            id,
            recorder,
            requests,
            bytes,
        } = batch;
        let requests: Vec<TransferRequest> = requests.into();

        if requests.is_empty() {
            self.device.discard_recording(recorder);
            self.pool.release_completed(id);
            self.settle();
            return Some(CompletedBatch {
                id,
                requests,
                bytes,
                outcome: Ok(()),
            });
        }

        tracing::debug!(
            "Submitting transfer batch {id}: {} requests, {bytes} bytes",
            requests.len()
        );
        let outcome = match self.device.submit(recorder) {
            Ok(submission) => {
                self.submissions.fetch_add(1, Ordering::Relaxed);
                self.last_batch_bytes.store(bytes, Ordering::Relaxed);
                self.device
                    .wait(submission, self.fence_timeout)
                    .map_err(|error| StagehandError::Submission(format!("{error:#}")))
            }
            Err(error) => Err(StagehandError::Submission(format!("{error:#}"))),
        };

        match &outcome {
            Ok(()) => {
                self.pool.release_completed(id);
            }
            Err(error) => {
                // staging memory may still be read by the queue until it drains
                match self.device.wait_idle() {
                    Ok(()) => {
                        self.pool.release_completed(id);
                    }
                    Err(idle_error) => tracing::error!(
                        "Keeping staging memory of batch {id} alive, queue did not drain after \
                         {error}: {idle_error:#}"
                    ),
                }
            }
        }
        self.settle();
        Some(CompletedBatch {
            id,
            requests,
            bytes,
            outcome,
        })
    }
}

impl<D: Device> Drop for TransferEngine<D> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.get_mut().take() {
            self.device.discard_recording(batch.recorder);
        }
        if let Err(error) = self.device.wait_idle() {
            tracing::error!("Transfer queue did not drain while shutting down: {error:#}");
        }
        self.pool.release_all();
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessDeviceCreateInfo};
    use crate::registry::RecordHandle;

    fn engine() -> (Arc<HeadlessDevice>, TransferEngine<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new(HeadlessDeviceCreateInfo::default()));
        let engine = TransferEngine::new(device.clone(), u64::MAX);
        (device, engine)
    }

    fn destination(device: &HeadlessDevice, size: vk::DeviceSize) -> vk::Buffer {
        use crate::allocators::{Allocator, MemoryLocation};
        let buffer = device
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER,
            )
            .unwrap();
        let requirements = device.buffer_memory_requirements(buffer).unwrap();
        let allocation = device
            .allocator()
            .allocate("destination", &requirements, MemoryLocation::GpuOnly, true)
            .unwrap();
        device.bind_buffer_memory(buffer, &allocation).unwrap();
        // the allocation has to outlive the test's copies
        std::mem::forget(allocation);
        buffer
    }

    #[test]
    fn test_idle_flush_does_not_submit() {
        let (device, engine) = engine();
        assert_eq!(engine.state(), TransferState::Idle);
        assert!(engine.complete().is_none());
        assert_eq!(engine.submissions(), 0);
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn test_batch_cycle() {
        let (device, engine) = engine();
        let buffer = destination(&device, 64);
        let mut staging = engine.pool().acquire(64).unwrap();
        staging.set_data(&[0xCD; 64], 0).unwrap();

        let batch = engine
            .record(|batch| {
                batch.record_buffer_upload(
                    RecordHandle::null(),
                    &staging,
                    buffer,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: 64,
                    }],
                    AccessScope::NONE,
                    AccessScope::TRANSFER_READ,
                );
                batch.id()
            })
            .unwrap();
        engine.pool().retire(batch, staging);
        assert_eq!(engine.state(), TransferState::Recording);
        assert!(engine.has_pending_work());

        let completed = engine.complete().unwrap();
        assert_eq!(completed.id, batch);
        assert!(completed.outcome.is_ok());
        assert_eq!(completed.requests.len(), 1);
        assert_eq!(completed.bytes, 64);
        assert_eq!(engine.state(), TransferState::Idle);
        assert_eq!(engine.submissions(), 1);
        assert_eq!(engine.pool().live_buffers(), 0);
        assert!(device.validation_errors().is_empty());

        // nothing new was recorded
        assert!(engine.complete().is_none());
        assert_eq!(device.submission_count(), 1);
    }

    #[test]
    fn test_requests_keep_recording_order() {
        let (device, engine) = engine();
        let buffers: Vec<_> = (0..4).map(|_| destination(&device, 4)).collect();
        let mut staging = engine.pool().acquire(16).unwrap();
        staging.set_data(&[1; 16], 0).unwrap();
        for (i, buffer) in buffers.iter().enumerate() {
            engine
                .record(|batch| {
                    batch.record_buffer_upload(
                        RecordHandle::from_raw(i as u64),
                        &staging,
                        *buffer,
                        &[vk::BufferCopy {
                            src_offset: i as u64 * 4,
                            dst_offset: 0,
                            size: 4,
                        }],
                        AccessScope::NONE,
                        AccessScope::TRANSFER_READ,
                    )
                })
                .unwrap();
        }
        let completed = engine.complete().unwrap();
        let order: Vec<u64> = completed
            .requests
            .iter()
            .map(|request| request.destination.to_raw())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_failed_submission_is_reported() {
        let (device, engine) = engine();
        let buffer = destination(&device, 4);
        let mut staging = engine.pool().acquire(4).unwrap();
        staging.set_data(&[1; 4], 0).unwrap();
        let id = engine
            .record(|batch| {
                batch.record_buffer_upload(
                    RecordHandle::null(),
                    &staging,
                    buffer,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: 4,
                    }],
                    AccessScope::NONE,
                    AccessScope::TRANSFER_READ,
                );
                batch.id()
            })
            .unwrap();
        engine.pool().retire(id, staging);
        device.fail_next_submission();
        let completed = engine.complete().unwrap();
        assert!(matches!(
            completed.outcome,
            Err(StagehandError::Submission(_))
        ));
        assert_eq!(engine.submissions(), 0);
        assert_eq!(engine.state(), TransferState::Idle);
        assert_eq!(engine.pool().live_buffers(), 0);
    }

    #[test]
    fn test_concurrent_flushes_keep_write_order() {
        let (device, engine) = engine();
        let buffer = destination(&device, 8);
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        engine.complete();
                        std::thread::yield_now();
                    }
                });
            }
            for value in 0..=64u8 {
                let mut staging = engine.pool().acquire(8).unwrap();
                staging.set_data(&[value; 8], 0).unwrap();
                let id = engine
                    .record(|batch| {
                        batch.record_buffer_upload(
                            RecordHandle::null(),
                            &staging,
                            buffer,
                            &[vk::BufferCopy {
                                src_offset: 0,
                                dst_offset: 0,
                                size: 8,
                            }],
                            AccessScope::TRANSFER_WRITE,
                            AccessScope::TRANSFER_READ,
                        );
                        batch.id()
                    })
                    .unwrap();
                engine.pool().retire(id, staging);
            }
            done.store(true, Ordering::Release);
        });
        engine.complete();
        // a later batch never lands before an earlier one
        assert_eq!(device.read_buffer_memory(buffer).unwrap(), vec![64; 8]);
        assert_eq!(engine.pool().live_buffers(), 0);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_concurrent_recording_shares_one_batch() {
        let (device, engine) = engine();
        let buffers: Vec<_> = (0..16).map(|_| destination(&device, 8)).collect();
        std::thread::scope(|scope| {
            for buffer in &buffers {
                let engine = &engine;
                scope.spawn(move || {
                    let mut staging = engine.pool().acquire(8).unwrap();
                    staging.set_data(&[9; 8], 0).unwrap();
                    let id = engine
                        .record(|batch| {
                            batch.record_buffer_upload(
                                RecordHandle::null(),
                                &staging,
                                *buffer,
                                &[vk::BufferCopy {
                                    src_offset: 0,
                                    dst_offset: 0,
                                    size: 8,
                                }],
                                AccessScope::NONE,
                                AccessScope::TRANSFER_READ,
                            );
                            batch.id()
                        })
                        .unwrap();
                    engine.pool().retire(id, staging);
                });
            }
        });
        let completed = engine.complete().unwrap();
        assert_eq!(completed.requests.len(), 16);
        assert_eq!(device.submission_count(), 1);
        assert!(device.validation_errors().is_empty());
        for buffer in &buffers {
            assert_eq!(device.read_buffer_memory(*buffer).unwrap(), vec![9; 8]);
        }
    }
}
