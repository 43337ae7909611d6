use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use stagehand_containers::prelude::{Slot, SlotMap};

use crate::resource::ResourceRecord;
use crate::StagehandError;

/// Stable reference to a live resource.
///
/// A plain value: it owns nothing and can be copied, stored, or passed across module boundaries
/// as a `u64` through [`Self::to_raw`] / [`Self::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecordHandle(Slot<ResourceRecord>);

impl RecordHandle {
    /// A handle that is never live
    pub fn null() -> Self {
        Self(Slot::null())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn to_raw(self) -> u64 {
        self.0.to_raw()
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(Slot::from_raw(raw))
    }

    fn slot<A>(self) -> Slot<RegistryEntry<A>> {
        self.0.cast()
    }
}

/// A record together with the memory and bookkeeping owned by the registry
#[derive(Debug)]
pub struct RegistryEntry<A> {
    pub record: ResourceRecord,
    pub allocation: Option<A>,
    /// Recorded copies targeting the resource that have not finished executing
    pub pending_transfers: u32,
    /// Host reads and writes of the mapped memory running outside the registry lock
    pub host_accesses: u32,
    /// Destruction was requested while the resource was busy
    pub destroy_deferred: bool,
}

impl<A> RegistryEntry<A> {
    pub fn new(record: ResourceRecord, allocation: Option<A>) -> Self {
        Self {
            record,
            allocation,
            pending_transfers: 0,
            host_accesses: 0,
            destroy_deferred: false,
        }
    }

    pub fn has_pending_transfer(&self) -> bool {
        self.pending_transfers > 0
    }

    /// Something still uses the memory, releasing it now would pull it out from under them
    pub fn is_busy(&self) -> bool {
        self.has_pending_transfer() || self.host_accesses > 0
    }
}

/// What to do when destroying a resource whose transfer is still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PendingDestroyPolicy {
    /// Destroy once the next batch has completed
    #[default]
    Defer,
    /// Refuse with [`StagehandError::TransferPending`]
    Reject,
}

/// Outcome of [`ResourceRegistry::remove`]
#[derive(Debug)]
pub enum Removal<A> {
    /// The entry left the registry and must be released by the caller
    Removed(RegistryEntry<A>),
    /// Nothing live under the handle
    Absent,
    /// Marked for removal after its pending transfers complete
    Deferred,
    Rejected,
}

/// Owner of every live resource record.
///
/// Each operation takes the lock for a constant amount of bookkeeping. Nothing here calls into the
/// device or the allocator, callers release native objects after the lock is gone.
#[derive(Debug)]
pub struct ResourceRegistry<A> {
    records: Mutex<SlotMap<RegistryEntry<A>>>,
}

impl<A> Default for ResourceRegistry<A> {
    fn default() -> Self {
        Self {
            records: Mutex::new(SlotMap::default()),
        }
    }
}

impl<A> ResourceRegistry<A> {
    /// A panic while the lock was held cannot leave the slot map half-updated, so poisoning is
    /// ignored
    fn records(&self) -> MutexGuard<'_, SlotMap<RegistryEntry<A>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, entry: RegistryEntry<A>) -> RecordHandle {
        let slot = self.records().insert(entry);
        RecordHandle(slot.cast())
    }

    pub fn contains(&self, handle: RecordHandle) -> bool {
        self.records().contains(handle.slot())
    }

    /// Snapshot of a live record
    pub fn lookup(&self, handle: RecordHandle) -> Result<ResourceRecord, StagehandError> {
        self.with_entry(handle, |entry| entry.record.clone())
    }

    /// Run `f` on a live entry. Entries waiting on a deferred destroy count as gone.
    pub fn with_entry<R>(
        &self,
        handle: RecordHandle,
        f: impl FnOnce(&RegistryEntry<A>) -> R,
    ) -> Result<R, StagehandError> {
        let records = self.records();
        match records.get(handle.slot()) {
            Some(entry) if !entry.destroy_deferred => Ok(f(entry)),
            _ => Err(StagehandError::NotFound),
        }
    }

    pub fn with_entry_mut<R>(
        &self,
        handle: RecordHandle,
        f: impl FnOnce(&mut RegistryEntry<A>) -> R,
    ) -> Result<R, StagehandError> {
        let mut records = self.records();
        match records.get_mut(handle.slot()) {
            Some(entry) if !entry.destroy_deferred => Ok(f(entry)),
            _ => Err(StagehandError::NotFound),
        }
    }

    /// Remove an entry unless a transfer still targets it
    pub fn remove(&self, handle: RecordHandle, policy: PendingDestroyPolicy) -> Removal<A> {
        let mut records = self.records();
        let slot = handle.slot();
        let Some(entry) = records.get_mut(slot) else {
            return Removal::Absent;
        };
        if entry.destroy_deferred {
            return Removal::Absent;
        }
        if entry.has_pending_transfer() && policy == PendingDestroyPolicy::Reject {
            return Removal::Rejected;
        }
        // host accesses end within the call that started them, so they always defer
        if entry.is_busy() {
            entry.destroy_deferred = true;
            return Removal::Deferred;
        }
        match records.remove(slot) {
            Ok(entry) => Removal::Removed(entry),
            Err(_) => Removal::Absent,
        }
    }

    /// Remove an entry regardless of pending transfers, used to unwind a failed creation
    pub(crate) fn take(&self, handle: RecordHandle) -> Option<RegistryEntry<A>> {
        self.records().remove(handle.slot()).ok()
    }

    /// Note that one transfer into the resource has finished executing.
    ///
    /// `layout` becomes the record's image layout when given. Returns the entry if a deferred
    /// destroy is now due.
    pub fn finish_transfer(
        &self,
        handle: RecordHandle,
        layout: Option<vk::ImageLayout>,
    ) -> Option<RegistryEntry<A>> {
        self.update_busy(handle, |entry| {
            entry.pending_transfers = entry.pending_transfers.saturating_sub(1);
            if let Some(layout) = layout {
                if entry.record.layout.is_some() {
                    entry.record.layout = Some(layout);
                }
            }
        })
    }

    /// Pin a live entry for a host access to its mapped memory.
    ///
    /// `f` decides under the lock whether the access goes ahead. A pinned entry can be destroyed
    /// but is only released by [`Self::finish_host_access`].
    pub fn begin_host_access<R>(
        &self,
        handle: RecordHandle,
        f: impl FnOnce(&RegistryEntry<A>) -> Result<R, StagehandError>,
    ) -> Result<R, StagehandError> {
        self.with_entry_mut(handle, |entry| -> Result<R, StagehandError> {
            let output = f(entry)?;
            entry.host_accesses += 1;
            Ok(output)
        })?
    }

    /// Unpin an entry after [`Self::begin_host_access`], returning it if a deferred destroy is
    /// now due
    pub fn finish_host_access(&self, handle: RecordHandle) -> Option<RegistryEntry<A>> {
        self.update_busy(handle, |entry| {
            entry.host_accesses = entry.host_accesses.saturating_sub(1);
        })
    }

    fn update_busy(
        &self,
        handle: RecordHandle,
        f: impl FnOnce(&mut RegistryEntry<A>),
    ) -> Option<RegistryEntry<A>> {
        let mut records = self.records();
        let slot = handle.slot();
        let entry = records.get_mut(slot)?;
        f(entry);
        if entry.destroy_deferred && !entry.is_busy() {
            records.remove(slot).ok()
        } else {
            None
        }
    }

    /// Remove every idle entry.
    ///
    /// Busy entries are marked for a deferred destroy instead and leave through
    /// [`Self::finish_transfer`] or [`Self::finish_host_access`]. Returns the removed entries and
    /// how many were deferred.
    pub fn drain(&self) -> (Vec<(RecordHandle, RegistryEntry<A>)>, usize) {
        let mut records = self.records();
        let slots: Vec<_> = records
            .iter()
            .filter(|(_, entry)| !entry.destroy_deferred)
            .map(|(slot, _)| slot)
            .collect();
        let mut removed = Vec::with_capacity(slots.len());
        let mut deferred = 0;
        for slot in slots {
            let Some(entry) = records.get_mut(slot) else {
                continue;
            };
            if entry.is_busy() {
                entry.destroy_deferred = true;
                deferred += 1;
                continue;
            }
            if let Ok(entry) = records.remove(slot) {
                removed.push((RecordHandle(slot.cast()), entry));
            }
        }
        (removed, deferred)
    }

    /// Handles of every live entry
    pub fn handles(&self) -> Vec<RecordHandle> {
        self.records()
            .iter()
            .filter(|(_, entry)| !entry.destroy_deferred)
            .map(|(slot, _)| RecordHandle(slot.cast()))
            .collect()
    }

    /// Number of live entries, deferred destroys excluded
    pub fn len(&self) -> usize {
        self.records()
            .iter()
            .filter(|(_, entry)| !entry.destroy_deferred)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
