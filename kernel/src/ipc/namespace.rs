// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Once;

use super::{
    ids::IpcIds,
    semaphore::system_v::{
        sem_set::SemaphoreSet,
        undo::{exit_sem, SemUndoRegistry},
        SemLimits,
    },
};
use crate::{prelude::*, process::Pid};

/// An isolated instance of the System V IPC objects.
///
/// Identifiers and keys are only meaningful within one namespace.
pub struct IpcNamespace {
    sem_limits: SemLimits,
    sem_ids: IpcIds<SemaphoreSet>,
    /// The number of semaphores in all sets of the namespace.
    ///
    /// Only changed while the lock of `sem_ids` is held.
    used_sems: AtomicUsize,
    sem_undo_registry: SemUndoRegistry,
}

impl IpcNamespace {
    pub fn new(sem_limits: SemLimits) -> Arc<Self> {
        debug!("[ipc_ns] new namespace, sem limits = {}", sem_limits);

        Arc::new(Self {
            sem_ids: IpcIds::new(sem_limits.semmni()),
            sem_limits,
            used_sems: AtomicUsize::new(0),
            sem_undo_registry: SemUndoRegistry::new(),
        })
    }

    /// Returns the namespace shared by processes that are not given one explicitly.
    ///
    /// It is created with the default limits on first use.
    pub fn get_root() -> &'static Arc<IpcNamespace> {
        static ROOT_IPC_NS: Once<Arc<IpcNamespace>> = Once::new();

        ROOT_IPC_NS.call_once(|| IpcNamespace::new(SemLimits::default()))
    }

    pub fn sem_limits(&self) -> &SemLimits {
        &self.sem_limits
    }

    pub fn sem_ids(&self) -> &IpcIds<SemaphoreSet> {
        &self.sem_ids
    }

    pub fn sem_undo_registry(&self) -> &SemUndoRegistry {
        &self.sem_undo_registry
    }

    /// Returns the number of semaphores in all sets.
    pub fn used_sems(&self) -> usize {
        self.used_sems.load(Ordering::Relaxed)
    }

    /// Reserves `nsems` semaphores against the system-wide limit.
    ///
    /// Must be called with the lock of `sem_ids` held.
    pub(super) fn charge_sems(&self, nsems: usize) -> Result<()> {
        let used = self.used_sems.load(Ordering::Relaxed);
        if used + nsems > self.sem_limits.semmns() {
            return_errno_with_message!(Errno::ENOSPC, "too many semaphores in the system");
        }
        self.used_sems.store(used + nsems, Ordering::Relaxed);
        Ok(())
    }

    /// Returns `nsems` semaphores reserved by [`Self::charge_sems`].
    ///
    /// Must be called with the lock of `sem_ids` held.
    pub(super) fn uncharge_sems(&self, nsems: usize) {
        self.used_sems.fetch_sub(nsems, Ordering::Relaxed);
    }

    /// Releases the IPC resources that the process `pid` holds in this namespace.
    ///
    /// This is invoked once by the process lifecycle when a process exits. It replays the
    /// semaphore adjustments that the process recorded with `SEM_UNDO`.
    pub fn on_process_exit(&self, pid: Pid) {
        exit_sem(self, pid);
    }
}

impl Debug for IpcNamespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IpcNamespace")
            .field("sem_limits", &self.sem_limits)
            .field("sem_sets", &self.sem_ids.in_use())
            .field("used_sems", &self.used_sems())
            .finish()
    }
}
