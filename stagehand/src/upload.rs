use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;

use crate::allocators::{Allocation, Allocator, MemoryLocation};
use crate::device::{Device, DeviceAllocation, MappedRange};
use crate::traits::Destructible;
use crate::StagehandError;

/// A host-visible buffer and the memory behind it.
///
/// Staging buffers are written front to back: every [`Self::set_data`] must start at or after the
/// end of the previous write. The same type backs readback buffers.
pub struct UploadBuffer<D: Device> {
    buffer: vk::Buffer,
    allocation: Option<DeviceAllocation<D>>,
    size: vk::DeviceSize,
    written: vk::DeviceSize,
    device: Arc<D>,
}

impl<D: Device> std::fmt::Debug for UploadBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("written", &self.written)
            .finish()
    }
}

impl<D: Device> UploadBuffer<D> {
    pub(crate) fn new(
        device: Arc<D>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self, StagehandError> {
        if size == 0 {
            return Err(StagehandError::invalid("host buffers must be non-empty"));
        }
        let buffer = device
            .create_buffer(size, usage)
            .map_err(StagehandError::device)?;
        let mut upload = Self {
            buffer,
            allocation: None,
            size,
            written: 0,
            device,
        };
        // from here on dropping `upload` releases whatever was created
        let requirements = upload
            .device
            .buffer_memory_requirements(buffer)
            .map_err(StagehandError::device)?;
        let allocation = upload
            .device
            .allocator()
            .allocate(name, &requirements, location, true)
            .map_err(|error| StagehandError::AllocationFailure(format!("{error:#}")))?;
        let allocation = upload.allocation.insert(allocation);
        upload
            .device
            .bind_buffer_memory(buffer, allocation)
            .map_err(StagehandError::device)?;
        if allocation.mapped_ptr().is_none() {
            return Err(StagehandError::NoMappedPointer);
        }

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating host buffer {name} {:?} of {size} bytes", buffer);

        Ok(upload)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// End of the furthest write so far
    pub fn written(&self) -> vk::DeviceSize {
        self.written
    }

    fn allocation(&self) -> Result<&DeviceAllocation<D>, StagehandError> {
        self.allocation.as_ref().ok_or(StagehandError::NoMappedPointer)
    }

    /// Copy `data` into the mapped memory at `offset`, flushing it for non-coherent memory
    pub fn set_data(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<(), StagehandError> {
        if data.is_empty() {
            return Ok(());
        }
        if offset < self.written {
            return Err(StagehandError::invalid(format!(
                "upload buffers are append-only: write at {offset} is before {}",
                self.written
            )));
        }
        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(StagehandError::invalid(format!(
                "write of {} bytes at {offset} overflows a {} byte upload buffer",
                data.len(),
                self.size
            )));
        }
        let allocation = self.allocation()?;
        let mapped = allocation
            .mapped_ptr()
            .ok_or(StagehandError::NoMappedPointer)?;
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.as_ptr().cast::<u8>().add(offset as usize),
                data.len(),
            );
        }
        if !allocation.is_coherent() {
            self.device
                .flush_mapped_range(MappedRange::within(
                    allocation,
                    offset,
                    data.len() as vk::DeviceSize,
                ))
                .map_err(StagehandError::device)?;
        }
        self.written = end;
        Ok(())
    }

    /// Read back `out.len()` bytes written by the device starting at `offset`
    pub fn read_data(&self, out: &mut [u8], offset: vk::DeviceSize) -> Result<(), StagehandError> {
        let end = offset + out.len() as vk::DeviceSize;
        if end > self.size {
            return Err(StagehandError::invalid(format!(
                "read of {} bytes at {offset} overflows a {} byte buffer",
                out.len(),
                self.size
            )));
        }
        let allocation = self.allocation()?;
        if !allocation.is_coherent() {
            self.device
                .invalidate_mapped_range(MappedRange::within(
                    allocation,
                    offset,
                    out.len() as vk::DeviceSize,
                ))
                .map_err(StagehandError::device)?;
        }
        let mapped = allocation
            .mapped_ptr()
            .ok_or(StagehandError::NoMappedPointer)?;
        unsafe {
            ptr::copy_nonoverlapping(
                mapped.as_ptr().cast::<u8>().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }
}

impl<D: Device> Destructible for UploadBuffer<D> {
    fn destroy(&mut self) {
        if self.buffer != vk::Buffer::null() {
            #[cfg(feature = "log-lifetimes")]
            tracing::trace!("Destroying host buffer {:?}", self.buffer);

            self.device.destroy_buffer(self.buffer);
            self.buffer = vk::Buffer::null();
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(error) = self.device.allocator().free(allocation) {
                tracing::error!("Failed to free upload buffer memory: {error:#}");
            }
        }
    }
}

impl<D: Device> Drop for UploadBuffer<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Source of staging buffers.
///
/// Every buffer is a fresh allocation. Once its copy is recorded the buffer is retired into the
/// pool under the batch that copies from it and lives until that batch is known complete.
pub struct UploadBufferPool<D: Device> {
    device: Arc<D>,
    live: Mutex<RetiredBuffers<D>>,
    created: AtomicU64,
}

struct RetiredBuffers<D: Device> {
    /// (batch id, buffer)
    buffers: Vec<(u64, UploadBuffer<D>)>,
    /// Highest batch known to have completed
    completed: u64,
}

impl<D: Device> std::fmt::Debug for UploadBufferPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBufferPool")
            .field("live_buffers", &self.live_buffers())
            .field("created", &self.created())
            .finish()
    }
}

impl<D: Device> UploadBufferPool<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            live: Mutex::new(RetiredBuffers {
                buffers: Vec::new(),
                completed: 0,
            }),
            created: AtomicU64::new(0),
        }
    }

    /// Create a staging buffer of `size` bytes
    pub fn acquire(&self, size: vk::DeviceSize) -> Result<UploadBuffer<D>, StagehandError> {
        let buffer = UploadBuffer::new(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "upload buffer",
        )?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn live(&self) -> MutexGuard<'_, RetiredBuffers<D>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep `buffer` alive until `batch` has completed.
    ///
    /// A buffer retired under a batch that already completed is destroyed right away.
    pub fn retire(&self, batch: u64, buffer: UploadBuffer<D>) {
        let mut live = self.live();
        if batch > live.completed {
            live.buffers.push((batch, buffer));
            return;
        }
        drop(live);
        drop(buffer);
    }

    /// Destroy every buffer retired under `batch` or an earlier one
    pub fn release_completed(&self, batch: u64) -> usize {
        let released: Vec<UploadBuffer<D>> = {
            let mut live = self.live();
            live.completed = live.completed.max(batch);
            let (released, kept): (Vec<_>, Vec<_>) =
                live.buffers.drain(..).partition(|(id, _)| *id <= batch);
            live.buffers = kept;
            released.into_iter().map(|(_, buffer)| buffer).collect()
        };
        // memory goes back to the allocator outside of the lock
        let count = released.len();
        drop(released);
        count
    }

    /// Destroy every retired buffer. Only sound once the device has gone idle.
    pub fn release_all(&self) -> usize {
        let released = std::mem::take(&mut self.live().buffers);
        let count = released.len();
        drop(released);
        count
    }

    /// Buffers retired and not yet released
    pub fn live_buffers(&self) -> usize {
        self.live().buffers.len()
    }

    /// Total staging buffers created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessDeviceCreateInfo};

    fn device(coherent: bool) -> Arc<HeadlessDevice> {
        Arc::new(HeadlessDevice::new(HeadlessDeviceCreateInfo {
            coherent,
            ..Default::default()
        }))
    }

    #[test]
    fn test_set_data_is_append_only() {
        let pool = UploadBufferPool::new(device(true));
        let mut buffer = pool.acquire(16).unwrap();
        buffer.set_data(&[1; 8], 0).unwrap();
        buffer.set_data(&[2; 4], 12).unwrap();
        assert_eq!(buffer.written(), 16);
        assert!(matches!(
            buffer.set_data(&[3; 4], 4),
            Err(StagehandError::InvalidDescriptor(_))
        ));
        let mut out = [0u8; 16];
        buffer.read_data(&mut out, 0).unwrap();
        assert_eq!(&out[..8], &[1; 8]);
        assert_eq!(&out[12..], &[2; 4]);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let pool = UploadBufferPool::new(device(true));
        let mut buffer = pool.acquire(4).unwrap();
        assert!(buffer.set_data(&[0; 5], 0).is_err());
        assert!(pool.acquire(0).is_err());
    }

    #[test]
    fn test_non_coherent_writes_are_flushed() {
        let device = device(false);
        let pool = UploadBufferPool::new(device.clone());
        let mut buffer = pool.acquire(8).unwrap();
        buffer.set_data(&[7; 8], 0).unwrap();
        assert_eq!(device.flush_count(), 1);
    }

    #[test]
    fn test_release_completed_keeps_newer_batches() {
        let device = device(true);
        let pool = UploadBufferPool::new(device.clone());
        pool.retire(1, pool.acquire(4).unwrap());
        pool.retire(2, pool.acquire(4).unwrap());
        assert_eq!(pool.live_buffers(), 2);
        assert_eq!(pool.release_completed(1), 1);
        assert_eq!(pool.live_buffers(), 1);
        assert_eq!(pool.release_all(), 1);
        assert_eq!(device.allocator().live_allocations(), 0);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_retiring_into_a_completed_batch_releases_immediately() {
        let device = device(true);
        let pool = UploadBufferPool::new(device.clone());
        pool.release_completed(3);
        pool.retire(2, pool.acquire(4).unwrap());
        assert_eq!(pool.live_buffers(), 0);
        pool.retire(4, pool.acquire(4).unwrap());
        assert_eq!(pool.live_buffers(), 1);
        assert_eq!(device.allocator().live_allocations(), 1);
    }
}
