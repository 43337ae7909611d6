use crate::allocators::Allocator;
use crate::device::{Device, DeviceAllocation};
use crate::diagnostics::Diagnostic;
use crate::registry::{RecordHandle, RegistryEntry, Removal};
use crate::resource::{NativeHandle, NativeView};
use crate::StagehandError;

use super::ResourceManager;

impl<D: Device> ResourceManager<D> {
    /// Destroy a resource along with its view and memory.
    ///
    /// Handles that are not live are ignored, so destroying twice is fine. A resource with a
    /// copy still waiting for [`Self::complete_transfers`] is either destroyed at the end of that
    /// call or refused with [`StagehandError::TransferPending`], depending on the configured
    /// [`PendingDestroyPolicy`](crate::registry::PendingDestroyPolicy).
    pub fn destroy_resource(&self, handle: RecordHandle) -> Result<(), StagehandError> {
        if handle.is_null() {
            return Ok(());
        }
        match self.registry.remove(handle, self.pending_destroy) {
            Removal::Removed(entry) => {
                self.release(handle, entry);
                Ok(())
            }
            Removal::Absent => Ok(()),
            Removal::Deferred => {
                tracing::debug!(
                    "Deferring destruction of {:#x} until its transfer completes",
                    handle.to_raw()
                );
                Ok(())
            }
            Removal::Rejected => Err(StagehandError::TransferPending),
        }
    }

    /// Flush pending transfers and destroy every resource.
    ///
    /// Intended for shutdown and for invalidation events, and safe while other threads keep
    /// creating. A resource whose copy was recorded after the flush is destroyed once the batch
    /// holding that copy completes, like any deferred destroy. Returns how many resources were
    /// destroyed or scheduled for destruction.
    pub fn destroy_all(&self) -> usize {
        self.complete_transfers();
        if let Err(error) = self.device.wait_idle() {
            tracing::error!("Transfer queue did not drain before destroying everything: {error:#}");
        }
        let (drained, deferred) = self.registry.drain();
        let count = drained.len();
        for (handle, entry) in drained {
            self.release(handle, entry);
        }
        if deferred > 0 {
            tracing::debug!(
                "{} deferring destruction of {deferred} resources until their transfers complete",
                self.name
            );
        }
        tracing::debug!("{} destroyed {count} resources", self.name);
        count + deferred
    }

    /// Release the native objects and memory of an entry that already left the registry.
    ///
    /// Order is view, object, memory.
    pub(crate) fn release(&self, handle: RecordHandle, entry: RegistryEntry<DeviceAllocation<D>>) {
        let RegistryEntry {
            record, allocation, ..
        } = entry;

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying {:?} {}", record.kind(), record.label());

        match record.view() {
            Some(NativeView::Buffer(view)) => self.device.destroy_buffer_view(view),
            Some(NativeView::Image(view)) => self.device.destroy_image_view(view),
            None => {}
        }
        match record.handle() {
            NativeHandle::Buffer(buffer) => self.device.destroy_buffer(buffer),
            NativeHandle::Image(image) => self.device.destroy_image(image),
            NativeHandle::Sampler(sampler) => self.device.destroy_sampler(sampler),
        }
        if let Some(allocation) = allocation {
            if let Err(error) = self.device.allocator().free(allocation) {
                self.diagnostics.report(Diagnostic::ReleaseFailed {
                    resource: handle,
                    error: format!("{error:#}"),
                });
            }
        }
    }
}
