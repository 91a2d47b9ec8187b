// SPDX-License-Identifier: MPL-2.0

//! Per-process semaphore adjustments (`SEM_UNDO`).
//!
//! Every operation performed with `SEM_UNDO` records the opposite of its value in the
//! adjustment vector of the calling process for that set. When the process exits, the
//! adjustments are applied so that the semaphores look as if the operations never
//! happened.
//!
//! The lists are owned by their processes. A semaphore set only remembers the PIDs of
//! the processes holding adjustments for it, and reaches their lists through the
//! [`SemUndoRegistry`] of its namespace. This keeps the ownership acyclic: removing a set
//! discards its records through the registry, and an exiting process finds its sets by
//! looking up their identifiers.

use hashbrown::HashMap;

use super::{sem::apply_undo, SemBuf, SemFlags};
use crate::{
    ipc::{ids::IpcId, IpcNamespace},
    prelude::*,
    process::{Pid, Process},
};

/// The adjustments of one process for one semaphore set.
#[derive(Debug, Clone)]
pub struct SemUndo {
    semadj: Box<[i32]>,
}

impl SemUndo {
    /// Returns the adjustment of each semaphore in the set.
    pub fn semadj(&self) -> &[i32] {
        &self.semadj
    }

    fn is_empty(&self) -> bool {
        self.semadj.iter().all(|&adj| adj == 0)
    }
}

/// The adjustments of one process for all semaphore sets.
pub struct SemUndoList {
    pid: Pid,
    undos: SpinLock<BTreeMap<IpcId, SemUndo>>,
}

impl SemUndoList {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            undos: SpinLock::new(BTreeMap::new()),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the adjustment recorded for the semaphore `sem_num` of the set `sem_id`.
    pub fn adjustment(&self, sem_id: IpcId, sem_num: usize) -> i32 {
        self.undos
            .lock()
            .get(&sem_id)
            .and_then(|undo| undo.semadj.get(sem_num).copied())
            .unwrap_or(0)
    }

    /// Returns whether the process holds adjustments for the set `sem_id`.
    pub fn contains(&self, sem_id: IpcId) -> bool {
        self.undos.lock().contains_key(&sem_id)
    }

    pub fn is_empty(&self) -> bool {
        self.undos.lock().is_empty()
    }

    /// Records the operations with `SEM_UNDO` among `sops`.
    ///
    /// Either all adjustments are recorded or, if one would exceed `semaem` in magnitude,
    /// none is and `ERANGE` is returned. On success, returns whether a record for the set
    /// exists afterwards; a record whose adjustments all cancel out is dropped.
    ///
    /// Must be called with the lock of the set held.
    pub(super) fn record(
        &self,
        sem_id: IpcId,
        nsems: usize,
        sops: &[SemBuf],
        semaem: i32,
    ) -> Result<bool> {
        let mut undos = self.undos.lock();

        let mut semadj = match undos.get(&sem_id) {
            Some(undo) => undo.semadj.clone(),
            None => vec![0; nsems].into_boxed_slice(),
        };
        for sop in sops
            .iter()
            .filter(|sop| sop.flags().contains(SemFlags::SEM_UNDO))
        {
            let adj = &mut semadj[sop.sem_num() as usize];
            let new_adj = *adj - sop.sem_op() as i32;
            if new_adj.abs() > semaem {
                return_errno_with_message!(Errno::ERANGE, "the adjustment would exceed SEMAEM");
            }
            *adj = new_adj;
        }

        let undo = SemUndo { semadj };
        if undo.is_empty() {
            undos.remove(&sem_id);
            return Ok(false);
        }
        undos.insert(sem_id, undo);
        Ok(true)
    }

    /// Clears the adjustments for the set `sem_id`, of one semaphore if `sem_num` is
    /// given and of all semaphores otherwise.
    ///
    /// Returns whether a record for the set exists afterwards.
    pub(super) fn clear(&self, sem_id: IpcId, sem_num: Option<usize>) -> bool {
        let mut undos = self.undos.lock();
        let Some(undo) = undos.get_mut(&sem_id) else {
            return false;
        };

        match sem_num.and_then(|sem_num| undo.semadj.get_mut(sem_num)) {
            Some(adj) => *adj = 0,
            None => undo.semadj.fill(0),
        }
        if undo.is_empty() {
            undos.remove(&sem_id);
            return false;
        }
        true
    }

    /// Discards the record for the set `sem_id` without applying it.
    pub(super) fn discard(&self, sem_id: IpcId) -> Option<SemUndo> {
        self.undos.lock().remove(&sem_id)
    }

    fn take_all(&self) -> BTreeMap<IpcId, SemUndo> {
        core::mem::take(&mut *self.undos.lock())
    }
}

impl Debug for SemUndoList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SemUndoList")
            .field("pid", &self.pid)
            .field("undos", &*self.undos.lock())
            .finish()
    }
}

/// Maps the PIDs of live processes to their undo lists.
pub struct SemUndoRegistry {
    lists: SpinLock<HashMap<Pid, Weak<SemUndoList>>>,
}

impl SemUndoRegistry {
    pub(in crate::ipc) fn new() -> Self {
        Self {
            lists: SpinLock::new(HashMap::new()),
        }
    }

    /// Registers the undo list of a new process.
    ///
    /// Entries of processes that are gone are pruned here.
    pub fn register(&self, undo_list: &Arc<SemUndoList>) {
        let mut lists = self.lists.lock();
        lists.retain(|_, list| list.strong_count() > 0);
        lists.insert(undo_list.pid(), Arc::downgrade(undo_list));
    }

    pub fn unregister(&self, pid: Pid) -> Option<Arc<SemUndoList>> {
        self.lists.lock().remove(&pid)?.upgrade()
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<SemUndoList>> {
        self.lists.lock().get(&pid)?.upgrade()
    }
}

impl Debug for SemUndoRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SemUndoRegistry")
            .field("num_lists", &self.lists.lock().len())
            .finish()
    }
}

/// Discards the adjustments of `process` for the set `sem_id` without applying them.
pub fn drop_sem_undo(sem_id: IpcId, process: &Process) -> Result<()> {
    let sem_set = process.ipc_ns().sem_ids().lookup(sem_id)?;
    let mut inner = sem_set.inner();
    if inner.is_removed {
        return_errno_with_message!(Errno::EIDRM, "the semaphore set has been removed");
    }

    process.sem_undo().discard(sem_id);
    inner.undo_pids.remove(&process.pid());
    Ok(())
}

/// Applies all adjustments of the exiting process `pid` and forgets its undo list.
///
/// Sets that have been removed in the meantime are skipped.
pub fn exit_sem(ipc_ns: &IpcNamespace, pid: Pid) {
    let Some(undo_list) = ipc_ns.sem_undo_registry().unregister(pid) else {
        return;
    };

    for (sem_id, undo) in undo_list.take_all() {
        let Ok(sem_set) = ipc_ns.sem_ids().lookup(sem_id) else {
            trace!("[exit_sem] pid = {}, sem_id = {} is gone", pid, sem_id);
            continue;
        };
        apply_undo(&sem_set, pid, undo.semadj());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SEM_ID: IpcId = IpcId::from_raw(7);

    fn undo_op(sem_num: u16, sem_op: i16) -> SemBuf {
        SemBuf::new(sem_num, sem_op, SemFlags::SEM_UNDO)
    }

    #[test]
    fn record_negates_operations() {
        let list = SemUndoList::new(1);
        let sops = [undo_op(0, -2), undo_op(2, 3), SemBuf::new(1, 5, SemFlags::empty())];

        assert!(list.record(SEM_ID, 3, &sops, 100).unwrap());
        assert_eq!(list.adjustment(SEM_ID, 0), 2);
        assert_eq!(list.adjustment(SEM_ID, 1), 0);
        assert_eq!(list.adjustment(SEM_ID, 2), -3);
    }

    #[test]
    fn balanced_record_is_dropped() {
        let list = SemUndoList::new(1);
        assert!(list.record(SEM_ID, 1, &[undo_op(0, -1)], 100).unwrap());
        assert!(!list.record(SEM_ID, 1, &[undo_op(0, 1)], 100).unwrap());
        assert!(list.is_empty());
    }

    #[test]
    fn record_beyond_semaem_changes_nothing() {
        let list = SemUndoList::new(1);
        assert!(list.record(SEM_ID, 2, &[undo_op(0, -4)], 5).unwrap());

        let res = list.record(SEM_ID, 2, &[undo_op(1, 1), undo_op(0, -2)], 5);
        assert_eq!(res.unwrap_err().error(), Errno::ERANGE);
        assert_eq!(list.adjustment(SEM_ID, 0), 4);
        assert_eq!(list.adjustment(SEM_ID, 1), 0);
    }

    #[test]
    fn clear_one_or_all() {
        let list = SemUndoList::new(1);
        list.record(SEM_ID, 2, &[undo_op(0, 1), undo_op(1, 1)], 100)
            .unwrap();

        assert!(list.clear(SEM_ID, Some(0)));
        assert_eq!(list.adjustment(SEM_ID, 0), 0);
        assert_eq!(list.adjustment(SEM_ID, 1), -1);

        assert!(!list.clear(SEM_ID, None));
        assert!(!list.contains(SEM_ID));
    }

    #[test]
    fn registry_does_not_keep_lists_alive() {
        let registry = SemUndoRegistry::new();
        let list = Arc::new(SemUndoList::new(3));
        registry.register(&list);
        assert!(registry.get(3).is_some());

        drop(list);
        assert!(registry.get(3).is_none());
        assert!(registry.unregister(3).is_none());
    }

    #[test]
    fn register_prunes_dead_lists() {
        let registry = SemUndoRegistry::new();
        let gone = Arc::new(SemUndoList::new(3));
        registry.register(&gone);
        drop(gone);
        assert_eq!(registry.lists.lock().len(), 1);

        let alive = Arc::new(SemUndoList::new(4));
        registry.register(&alive);
        let lists = registry.lists.lock();
        assert_eq!(lists.len(), 1);
        assert!(lists.contains_key(&4));
    }
}
