use std::ffi::c_void;
use std::ptr::{self, NonNull};

use ash::vk;

use crate::allocators::Allocation;
use crate::device::{Device, MappedRange};
use crate::registry::RecordHandle;
use crate::StagehandError;

use super::ResourceManager;

/// Host mapping of an allocation, copied out so the memory can be touched after the registry
/// lock is gone. Only valid while the owning entry is pinned or still under construction.
#[derive(Debug, Clone, Copy)]
pub(super) struct HostMapping {
    ptr: NonNull<c_void>,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    coherent: bool,
}

impl HostMapping {
    pub fn of<A: Allocation>(allocation: &A) -> Result<Self, StagehandError> {
        Ok(Self {
            ptr: allocation
                .mapped_ptr()
                .ok_or(StagehandError::NoMappedPointer)?,
            memory: allocation.memory(),
            offset: allocation.offset(),
            size: allocation.size(),
            coherent: allocation.is_coherent(),
        })
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// `len` bytes at `offset` relative to the start of the allocation
    fn range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> MappedRange {
        MappedRange {
            memory: self.memory,
            offset: self.offset + offset,
            size: len,
        }
    }

    fn check(&self, what: &str, offset: vk::DeviceSize, len: usize) -> Result<(), StagehandError> {
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(StagehandError::invalid(format!(
                "{what} of {len} bytes at {offset} overflows {} bytes of memory",
                self.size
            )));
        }
        Ok(())
    }

    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), StagehandError> {
        self.check("write", offset, data.len())?;
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().cast::<u8>().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> Result<(), StagehandError> {
        self.check("read", offset, out.len())?;
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.as_ptr().cast::<u8>().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }
}

impl<D: Device> ResourceManager<D> {
    /// Make host writes visible to the device
    pub(super) fn flush_if_needed(
        &self,
        mapping: &HostMapping,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), StagehandError> {
        if mapping.coherent || size == 0 {
            return Ok(());
        }
        self.device
            .flush_mapped_range(mapping.range(offset, size))
            .map_err(StagehandError::device)
    }

    /// Make device writes visible to the host
    pub(super) fn invalidate_if_needed(&self, mapping: &HostMapping) -> Result<(), StagehandError> {
        if mapping.coherent {
            return Ok(());
        }
        self.device
            .invalidate_mapped_range(mapping.range(0, mapping.size))
            .map_err(StagehandError::device)
    }

    /// Unpin an entry after a host access, releasing it if it was destroyed meanwhile
    pub(super) fn finish_host_access(&self, handle: RecordHandle) {
        if let Some(entry) = self.registry.finish_host_access(handle) {
            self.release(handle, entry);
        }
    }
}
