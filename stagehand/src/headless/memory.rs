use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt::{Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use ash::vk;
use ash::vk::Handle;

use crate::allocators::{Allocation, Allocator, MemoryLocation};

/// Zeroed heap bytes at a stable address
pub(crate) struct RawBytes {
    ptr: NonNull<u8>,
    len: usize,
}

// access is coordinated by the device the same way real mapped memory is
unsafe impl Send for RawBytes {}
unsafe impl Sync for RawBytes {}

impl Debug for RawBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBytes")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl RawBytes {
    fn zeroed(len: usize) -> Self {
        let bytes: &mut [u8] = Box::leak(vec![0u8; len.max(1)].into_boxed_slice());
        Self {
            len: bytes.len(),
            ptr: NonNull::from(bytes).cast(),
        }
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => anyhow::bail!(
                "access of {len} bytes at {offset} is outside a {} byte block",
                self.len
            ),
        }
    }

    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check(offset, out.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn copy_to(&self, other: &RawBytes, offset: usize, len: usize) -> Result<()> {
        self.check(offset, len)?;
        other.check(offset, len)?;
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                other.ptr.as_ptr().add(offset),
                len,
            );
        }
        Ok(())
    }
}

impl Drop for RawBytes {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

/// One `vk::DeviceMemory` worth of host memory.
///
/// Non-coherent blocks keep a second copy standing in for what the device sees: host writes only
/// reach it through a flush, device writes only come back through an invalidate.
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    handle: vk::DeviceMemory,
    size: vk::DeviceSize,
    location: MemoryLocation,
    host: RawBytes,
    device: Option<RawBytes>,
}

impl MemoryBlock {
    pub(crate) fn handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    pub(crate) fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Bytes as the device reads and writes them
    pub(crate) fn device_bytes(&self) -> &RawBytes {
        self.device.as_ref().unwrap_or(&self.host)
    }

    fn clamp(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> (usize, usize) {
        let offset = offset.min(self.size);
        let size = if size == vk::WHOLE_SIZE {
            self.size - offset
        } else {
            size.min(self.size - offset)
        };
        (offset as usize, size as usize)
    }

    pub(crate) fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        if let Some(device) = &self.device {
            let (offset, size) = self.clamp(offset, size);
            self.host.copy_to(device, offset, size)?;
        }
        Ok(())
    }

    pub(crate) fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        if let Some(device) = &self.device {
            let (offset, size) = self.clamp(offset, size);
            device.copy_to(&self.host, offset, size)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HeadlessHeap {
    blocks: Mutex<HashMap<vk::DeviceMemory, Arc<MemoryBlock>>>,
    next_handle: AtomicU64,
    allocated: AtomicU64,
    budget: Option<vk::DeviceSize>,
    coherent: bool,
    fail_next: AtomicBool,
}

/// Hands out one dedicated block of host memory per allocation
#[derive(Debug, Clone)]
pub struct HeadlessAllocator {
    heap: Arc<HeadlessHeap>,
}

#[derive(Debug)]
pub struct HeadlessAllocation {
    block: Arc<MemoryBlock>,
    name: String,
}

impl HeadlessAllocator {
    /// `budget` caps the bytes live at once, `coherent` controls host-visible memory
    pub fn new(budget: Option<vk::DeviceSize>, coherent: bool) -> Self {
        Self {
            heap: Arc::new(HeadlessHeap {
                blocks: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                allocated: AtomicU64::new(0),
                budget,
                coherent,
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    fn blocks(&self) -> std::sync::MutexGuard<'_, HashMap<vk::DeviceMemory, Arc<MemoryBlock>>> {
        self.heap
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn block(&self, memory: vk::DeviceMemory) -> Option<Arc<MemoryBlock>> {
        self.blocks().get(&memory).cloned()
    }

    /// Make the next allocation fail as if the device ran out of memory
    pub fn fail_next_allocation(&self) {
        self.heap.fail_next.store(true, Ordering::Release);
    }

    pub fn live_allocations(&self) -> usize {
        self.blocks().len()
    }

    pub fn allocated_bytes(&self) -> vk::DeviceSize {
        self.heap.allocated.load(Ordering::Acquire)
    }
}

impl Allocator for HeadlessAllocator {
    type Allocation = HeadlessAllocation;

    fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        location: MemoryLocation,
        _linear: bool,
    ) -> Result<HeadlessAllocation> {
        if self.heap.fail_next.swap(false, Ordering::AcqRel) {
            anyhow::bail!("out of device memory while allocating {name}");
        }
        let size = requirements.size;
        let previous = self.heap.allocated.fetch_add(size, Ordering::AcqRel);
        if let Some(budget) = self.heap.budget {
            if previous + size > budget {
                self.heap.allocated.fetch_sub(size, Ordering::AcqRel);
                anyhow::bail!(
                    "{name} needs {size} bytes, only {} of {budget} are left",
                    budget.saturating_sub(previous)
                );
            }
        }

        let handle =
            vk::DeviceMemory::from_raw(self.heap.next_handle.fetch_add(1, Ordering::Relaxed));
        let host_visible = location.is_host_visible();
        let block = Arc::new(MemoryBlock {
            handle,
            size,
            location,
            host: RawBytes::zeroed(size as usize),
            device: (host_visible && !self.heap.coherent).then(|| RawBytes::zeroed(size as usize)),
        });
        self.blocks().insert(handle, block.clone());

        #[cfg(feature = "log-memory-allocations")]
        tracing::trace!("Allocated {name} ({size} bytes, {location:?})");

        Ok(HeadlessAllocation {
            block,
            name: name.to_string(),
        })
    }

    fn free(&self, allocation: HeadlessAllocation) -> Result<()> {
        #[cfg(feature = "log-memory-allocations")]
        tracing::trace!("Freeing {}", allocation.name);

        let removed = self.blocks().remove(&allocation.block.handle);
        match removed {
            Some(block) => {
                self.heap.allocated.fetch_sub(block.size, Ordering::AcqRel);
                Ok(())
            }
            None => anyhow::bail!("{} was freed twice", allocation.name),
        }
    }
}

impl Allocation for HeadlessAllocation {
    fn memory(&self) -> vk::DeviceMemory {
        self.block.handle
    }

    fn offset(&self) -> vk::DeviceSize {
        0
    }

    fn size(&self) -> vk::DeviceSize {
        self.block.size
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.block
            .location
            .is_host_visible()
            .then(|| self.block.host.ptr.cast())
    }

    fn is_coherent(&self) -> bool {
        self.block.device.is_none()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(size: vk::DeviceSize) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size,
            alignment: 16,
            memory_type_bits: 1,
        }
    }

    #[test]
    fn test_host_visibility_follows_location() {
        let allocator = HeadlessAllocator::new(None, true);
        let device_local = allocator
            .allocate("gpu", &requirements(64), MemoryLocation::GpuOnly, true)
            .unwrap();
        let upload = allocator
            .allocate("cpu", &requirements(64), MemoryLocation::CpuToGpu, true)
            .unwrap();
        assert!(device_local.mapped_ptr().is_none());
        assert!(upload.mapped_ptr().is_some());
        assert_eq!(allocator.live_allocations(), 2);
        allocator.free(device_local).unwrap();
        allocator.free(upload).unwrap();
        assert_eq!(allocator.allocated_bytes(), 0);
    }

    #[test]
    fn test_budget_is_enforced() {
        let allocator = HeadlessAllocator::new(Some(100), true);
        let first = allocator
            .allocate("first", &requirements(64), MemoryLocation::GpuOnly, true)
            .unwrap();
        assert!(allocator
            .allocate("second", &requirements(64), MemoryLocation::GpuOnly, true)
            .is_err());
        assert_eq!(allocator.allocated_bytes(), 64);
        allocator.free(first).unwrap();
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let allocator = HeadlessAllocator::new(None, true);
        allocator.fail_next_allocation();
        assert!(allocator
            .allocate("a", &requirements(4), MemoryLocation::GpuOnly, true)
            .is_err());
        let allocation = allocator
            .allocate("b", &requirements(4), MemoryLocation::GpuOnly, true)
            .unwrap();
        allocator.free(allocation).unwrap();
    }

    #[test]
    fn test_non_coherent_needs_flush() {
        let allocator = HeadlessAllocator::new(None, false);
        let allocation = allocator
            .allocate("staging", &requirements(8), MemoryLocation::CpuToGpu, true)
            .unwrap();
        assert!(!allocation.is_coherent());
        let block = allocator.block(allocation.memory()).unwrap();
        block.host.write(0, &[5; 8]).unwrap();

        let mut seen = [0u8; 8];
        block.device_bytes().read(0, &mut seen).unwrap();
        assert_eq!(seen, [0; 8]);
        block.flush(0, vk::WHOLE_SIZE).unwrap();
        block.device_bytes().read(0, &mut seen).unwrap();
        assert_eq!(seen, [5; 8]);
        allocator.free(allocation).unwrap();
    }
}
