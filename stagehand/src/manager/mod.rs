//! The public face of the crate: one [`ResourceManager`] owns the registry, the staging pool and
//! the transfer engine of a device.
use std::sync::Arc;

use ash::vk;
use crossbeam_channel::Receiver;

use crate::device::{Device, DeviceAllocation};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::registry::{PendingDestroyPolicy, RecordHandle, ResourceRegistry};
use crate::resource::{ResourceKind, ResourceRecord};
use crate::transfer::{CompletedBatch, TransferEngine, TransferState};
use crate::StagehandError;

mod create;
mod destroy;
mod host;
mod readback;

/// What to do with resources still live when the manager is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LeakPolicy {
    /// Release them without a word
    Silent,
    /// Report each one as a [`Diagnostic::LeakedResource`]
    #[default]
    Warn,
    /// Report each one and log the total as an error
    Error,
}

#[derive(Debug, Clone)]
pub struct ResourceManagerCreateInfo {
    /// Used in logs
    pub name: String,
    pub leak_policy: LeakPolicy,
    pub pending_destroy: PendingDestroyPolicy,
    /// Nanoseconds to wait on a submitted batch
    pub fence_timeout: u64,
    /// Minimum alignment of regions inside a staging buffer
    pub staging_alignment: vk::DeviceSize,
}

impl Default for ResourceManagerCreateInfo {
    fn default() -> Self {
        Self {
            name: String::from("resource manager"),
            leak_policy: LeakPolicy::default(),
            pending_destroy: PendingDestroyPolicy::default(),
            fence_timeout: u64::MAX,
            staging_alignment: 4,
        }
    }
}

/// Creates, populates and destroys GPU resources.
///
/// Every method takes `&self` and may be called from any number of threads. One thread is
/// expected to call [`Self::complete_transfers`] once per tick to flush the staged copies.
pub struct ResourceManager<D: Device> {
    name: String,
    device: Arc<D>,
    registry: ResourceRegistry<DeviceAllocation<D>>,
    engine: TransferEngine<D>,
    diagnostics: DiagnosticSink,
    leak_policy: LeakPolicy,
    pending_destroy: PendingDestroyPolicy,
    staging_alignment: vk::DeviceSize,
}

impl<D: Device> std::fmt::Debug for ResourceManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("name", &self.name)
            .field("live", &self.live_count())
            .field("engine", &self.engine)
            .finish()
    }
}

impl<D: Device> ResourceManager<D> {
    pub fn new(
        device: Arc<D>,
        create_info: ResourceManagerCreateInfo,
    ) -> Result<Self, StagehandError> {
        let queue = device.queue_info();
        if !queue.supports_transfer() {
            return Err(StagehandError::invalid(format!(
                "queue family {} cannot execute transfers",
                queue.family_index
            )));
        }
        if !create_info.staging_alignment.is_power_of_two() {
            return Err(StagehandError::invalid(format!(
                "staging alignment {} is not a power of two",
                create_info.staging_alignment
            )));
        }

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating {} on queue family {}", create_info.name, queue.family_index);

        Ok(Self {
            engine: TransferEngine::new(device.clone(), create_info.fence_timeout),
            device,
            name: create_info.name,
            registry: ResourceRegistry::default(),
            diagnostics: DiagnosticSink::default(),
            leak_policy: create_info.leak_policy,
            pending_destroy: create_info.pending_destroy,
            staging_alignment: create_info.staging_alignment,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Receiver of everything that went wrong after the call that caused it returned
    pub fn diagnostics(&self) -> Receiver<Diagnostic> {
        self.diagnostics.receiver()
    }

    /// Snapshot of a live resource
    pub fn lookup(&self, handle: RecordHandle) -> Result<ResourceRecord, StagehandError> {
        self.registry.lookup(handle)
    }

    /// Kind of the resource, [`ResourceKind::Invalid`] if `handle` is not live
    pub fn kind(&self, handle: RecordHandle) -> ResourceKind {
        self.registry
            .with_entry(handle, |entry| entry.record.kind())
            .unwrap_or(ResourceKind::Invalid)
    }

    pub fn contains(&self, handle: RecordHandle) -> bool {
        self.registry.with_entry(handle, |_| ()).is_ok()
    }

    /// Number of live resources
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    pub fn handles(&self) -> Vec<RecordHandle> {
        self.registry.handles()
    }

    /// Layout every subresource of an image is in once its pending transfers have completed
    pub fn image_layout(&self, handle: RecordHandle) -> Result<vk::ImageLayout, StagehandError> {
        self.registry
            .with_entry(handle, |entry| entry.record.layout())?
            .ok_or_else(|| StagehandError::invalid("resource is not an image"))
    }

    /// Whether the resource has copies that no completed batch has executed yet
    pub fn has_pending_transfer(&self, handle: RecordHandle) -> Result<bool, StagehandError> {
        self.registry.with_entry(handle, |entry| entry.has_pending_transfer())
    }

    pub fn transfer_state(&self) -> TransferState {
        self.engine.state()
    }

    /// Whether staged work is waiting for [`Self::complete_transfers`]
    pub fn has_pending_transfers(&self) -> bool {
        self.engine.has_pending_work()
    }

    /// Batches handed to the queue so far
    pub fn submissions(&self) -> u64 {
        self.engine.submissions()
    }

    /// Bytes copied by the most recent batch
    pub fn last_batch_bytes(&self) -> vk::DeviceSize {
        self.engine.last_batch_bytes()
    }

    /// Staging buffers waiting on their batch
    pub fn live_staging_buffers(&self) -> usize {
        self.engine.pool().live_buffers()
    }

    /// Flush every copy recorded since the last call and wait for it.
    ///
    /// Meant to be called once per tick from a single thread. Returns [`None`] without touching
    /// the queue when nothing was recorded. A failed batch is reported as a
    /// [`Diagnostic::TransferFailed`], the creation calls that staged it have already returned.
    pub fn complete_transfers(&self) -> Option<CompletedBatch> {
        let completed = self.engine.complete()?;
        if let Err(error) = &completed.outcome {
            self.diagnostics.report(Diagnostic::TransferFailed {
                batch: completed.id,
                resources: completed
                    .requests
                    .iter()
                    .map(|request| request.destination)
                    .collect(),
                error: error.clone(),
            });
        }
        let executed = completed.outcome.is_ok();
        for request in &completed.requests {
            // failed batches never transitioned anything
            let layout = request.final_layout().filter(|_| executed);
            if let Some(entry) = self.registry.finish_transfer(request.destination, layout) {
                self.release(request.destination, entry);
            }
        }
        Some(completed)
    }
}

impl<D: Device> Drop for ResourceManager<D> {
    fn drop(&mut self) {
        self.complete_transfers();
        if self.leak_policy != LeakPolicy::Silent {
            let leaked: Vec<(RecordHandle, ResourceRecord)> = self
                .registry
                .handles()
                .into_iter()
                .filter_map(|handle| Some((handle, self.registry.lookup(handle).ok()?)))
                .collect();
            if self.leak_policy == LeakPolicy::Error && !leaked.is_empty() {
                tracing::error!("{} is dropped with {} live resources", self.name, leaked.len());
            }
            for (resource, record) in leaked {
                self.diagnostics.report(Diagnostic::LeakedResource {
                    resource,
                    kind: record.kind(),
                    name: record.name().map(str::to_string),
                });
            }
        }
        self.destroy_all();
    }
}
