// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicU64, Ordering};

use super::{
    sem::{count_waiters, update_pending_ops, PendingOp, Semaphore, Status},
    undo::SemUndoRegistry,
    SemLimits,
};
use crate::{
    ipc::{
        ids::{IdTable, IpcId, IpcObject},
        key_t, IpcFlags, IpcNamespace, IpcPerm, IpcPermission, PermissionMode, IPC_PRIVATE,
    },
    prelude::*,
    process::{Credentials, Pid},
    time::clocks::RealTimeCoarseClock,
};

/// A System V semaphore set.
pub struct SemaphoreSet {
    /// Number of semaphores in the set
    nsems: usize,
    inner: SpinLock<SemSetInner>,
    permission: IpcPermission,
    /// Creation time or last modification via `semctl`
    sem_ctime: AtomicU64,
    /// Last semop time
    sem_otime: AtomicU64,
}

/// The state of a set protected by its lock.
#[derive(Debug)]
pub(super) struct SemSetInner {
    pub(super) id: IpcId,
    pub(super) semvmx: i32,
    pub(super) semaem: i32,
    pub(super) sems: Box<[Semaphore]>,
    /// Requests waiting for the values to change, in arrival order.
    pub(super) pending_ops: VecDeque<Arc<PendingOp>>,
    /// Processes that may hold adjustments for this set.
    pub(super) undo_pids: BTreeSet<Pid>,
    pub(super) is_removed: bool,
}

impl SemSetInner {
    fn new(id: IpcId, nsems: usize, limits: &SemLimits) -> Self {
        Self {
            id,
            semvmx: limits.semvmx(),
            semaem: limits.semaem(),
            sems: vec![Semaphore::new(0); nsems].into_boxed_slice(),
            pending_ops: VecDeque::new(),
            undo_pids: BTreeSet::new(),
            is_removed: false,
        }
    }

    /// Clears the adjustments that processes hold for the semaphore `sem_num`, or for all
    /// semaphores if `sem_num` is `None`.
    fn clear_undos(&mut self, registry: &SemUndoRegistry, sem_num: Option<usize>) {
        let id = self.id;
        self.undo_pids.retain(|&pid| {
            registry
                .get(pid)
                .is_some_and(|undo_list| undo_list.clear(id, sem_num))
        });
    }
}

/// The status of a set, laid out like `struct semid64_ds`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SemidDs {
    pub sem_perm: IpcPerm,
    /// Last semop time, in seconds
    pub sem_otime: u64,
    /// Last change time, in seconds
    pub sem_ctime: u64,
    pub sem_nsems: u64,
}

/// Semaphore limits and usage, laid out like `struct seminfo`.
///
/// `IPC_INFO` reports limits only. `SEM_INFO` reports the number of sets in `semusz` and
/// the number of semaphores in `semaem` instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SemInfo {
    pub semmap: i32,
    pub semmni: i32,
    pub semmns: i32,
    pub semmnu: i32,
    pub semmsl: i32,
    pub semopm: i32,
    pub semume: i32,
    pub semusz: i32,
    pub semvmx: i32,
    pub semaem: i32,
}

impl SemInfo {
    pub fn new(ipc_ns: &IpcNamespace, with_usage: bool) -> Self {
        let limits = ipc_ns.sem_limits();
        let to_i32 = |val: usize| i32::try_from(val).unwrap_or(i32::MAX);

        let mut info = Self {
            semmap: to_i32(limits.semmns()),
            semmni: to_i32(limits.semmni()),
            semmns: to_i32(limits.semmns()),
            semmnu: to_i32(limits.semmns()),
            semmsl: to_i32(limits.semmsl()),
            semopm: to_i32(limits.semopm()),
            semume: to_i32(limits.semopm()),
            semusz: size_of::<SemidDs>() as i32,
            semvmx: limits.semvmx(),
            semaem: limits.semaem(),
        };
        if with_usage {
            let table = ipc_ns.sem_ids().lock_table();
            info.semusz = to_i32(table.in_use());
            info.semaem = to_i32(ipc_ns.used_sems());
        }
        info
    }
}

impl SemaphoreSet {
    fn new(
        id: IpcId,
        key: key_t,
        nsems: usize,
        mode: u16,
        credentials: &Credentials,
        limits: &SemLimits,
    ) -> Self {
        Self {
            nsems,
            inner: SpinLock::new(SemSetInner::new(id, nsems, limits)),
            permission: IpcPermission::new(key, id, credentials, mode),
            sem_ctime: AtomicU64::new(now_secs()),
            sem_otime: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> IpcId {
        self.permission.id()
    }

    pub fn nsems(&self) -> usize {
        self.nsems
    }

    pub fn permission(&self) -> &IpcPermission {
        &self.permission
    }

    pub fn get<T>(&self, sem_num: usize, func: &dyn Fn(&Semaphore) -> T) -> Result<T> {
        let inner = self.inner();
        Ok(func(inner.sems.get(sem_num).ok_or(Error::with_message(
            Errno::EINVAL,
            "the semaphore index is out of range",
        ))?))
    }

    pub fn get_all(&self) -> Vec<i32> {
        self.inner().sems.iter().map(Semaphore::val).collect()
    }

    /// Returns the number of requests waiting for the semaphore to increase (`GETNCNT`).
    pub fn pending_alter_count(&self, sem_num: u16) -> usize {
        count_waiters(&self.inner(), sem_num, false)
    }

    /// Returns the number of requests waiting for the semaphore to become zero (`GETZCNT`).
    pub fn pending_const_count(&self, sem_num: u16) -> usize {
        count_waiters(&self.inner(), sem_num, true)
    }

    /// Sets the value of one semaphore (`SETVAL`).
    ///
    /// The adjustments that processes hold for the semaphore are cleared, and waiting
    /// requests that become satisfiable are completed.
    pub fn setval(
        &self,
        sem_num: usize,
        val: i32,
        pid: Pid,
        registry: &SemUndoRegistry,
    ) -> Result<()> {
        let mut inner = self.inner();
        if inner.is_removed {
            return_errno_with_message!(Errno::EIDRM, "the semaphore set has been removed");
        }
        if sem_num >= inner.sems.len() {
            return_errno_with_message!(Errno::EINVAL, "the semaphore index is out of range");
        }
        if !(0..=inner.semvmx).contains(&val) {
            return_errno_with_message!(Errno::ERANGE, "the semaphore value is out of range");
        }

        let sem = &mut inner.sems[sem_num];
        sem.set_val(val);
        sem.set_latest_modified_pid(pid);

        inner.clear_undos(registry, Some(sem_num));
        self.update_ctime();
        self.update_and_wake(inner);
        Ok(())
    }

    /// Sets the values of all semaphores (`SETALL`).
    pub fn setall(&self, vals: &[i32], pid: Pid, registry: &SemUndoRegistry) -> Result<()> {
        if vals.len() != self.nsems {
            return_errno_with_message!(Errno::EINVAL, "the number of values does not match");
        }

        let mut inner = self.inner();
        if inner.is_removed {
            return_errno_with_message!(Errno::EIDRM, "the semaphore set has been removed");
        }
        let semvmx = inner.semvmx;
        if vals.iter().any(|val| !(0..=semvmx).contains(val)) {
            return_errno_with_message!(Errno::ERANGE, "the semaphore value is out of range");
        }

        for (sem, &val) in inner.sems.iter_mut().zip(vals) {
            sem.set_val(val);
            sem.set_latest_modified_pid(pid);
        }

        inner.clear_undos(registry, None);
        self.update_ctime();
        self.update_and_wake(inner);
        Ok(())
    }

    pub fn stat(&self) -> SemidDs {
        SemidDs {
            sem_perm: self.permission.to_ipc_perm(),
            sem_otime: self.sem_otime().as_secs(),
            sem_ctime: self.sem_ctime().as_secs(),
            sem_nsems: self.nsems as u64,
        }
    }

    /// Changes the owner and the permission bits (`IPC_SET`).
    pub fn set_perm(&self, perm: &IpcPerm, credentials: &Credentials) -> Result<()> {
        if !self.permission.is_owner(credentials) {
            return_errno_with_message!(Errno::EPERM, "only the owner can change the set");
        }
        self.permission
            .set_owner(perm.uid.into(), perm.gid.into(), perm.mode);
        self.update_ctime();
        Ok(())
    }

    pub fn sem_ctime(&self) -> Duration {
        Duration::from_secs(self.sem_ctime.load(Ordering::Relaxed))
    }

    pub fn sem_otime(&self) -> Duration {
        Duration::from_secs(self.sem_otime.load(Ordering::Relaxed))
    }

    pub fn update_ctime(&self) {
        self.sem_ctime.store(now_secs(), Ordering::Relaxed);
    }

    pub fn update_otime(&self) {
        self.sem_otime.store(now_secs(), Ordering::Relaxed);
    }

    pub(super) fn inner(&self) -> SpinLockGuard<'_, SemSetInner> {
        self.inner.lock()
    }

    /// Completes the pending requests that the new values satisfy.
    ///
    /// The lock is released before the requesters are woken up.
    pub(super) fn update_and_wake(&self, mut inner: SpinLockGuard<'_, SemSetInner>) {
        let wake_queue = update_pending_ops(&mut inner);
        drop(inner);

        if wake_queue
            .iter()
            .any(|pending_op| pending_op.status() == Status::Normal)
        {
            self.update_otime();
        }
        for pending_op in wake_queue {
            pending_op.wake_up();
        }
    }

    /// Marks the set as removed and fails all pending requests with `EIDRM`.
    ///
    /// Must be called with the identifier table locked, after the set has been removed
    /// from it.
    fn destroy(&self, registry: &SemUndoRegistry) {
        let mut inner = self.inner();
        inner.is_removed = true;

        let wake_queue: Vec<_> = inner.pending_ops.drain(..).collect();
        for pending_op in wake_queue.iter() {
            pending_op.set_status(Status::Removed);
        }

        let id = inner.id;
        for pid in core::mem::take(&mut inner.undo_pids) {
            if let Some(undo_list) = registry.get(pid) {
                undo_list.discard(id);
            }
        }
        drop(inner);

        for pending_op in wake_queue {
            pending_op.wake_up();
        }
    }
}

impl IpcObject for SemaphoreSet {
    fn permission(&self) -> &IpcPermission {
        &self.permission
    }
}

impl Debug for SemaphoreSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SemaphoreSet")
            .field("id", &self.id())
            .field("key", &self.permission.key())
            .field("nsems", &self.nsems)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    RealTimeCoarseClock::get().read_time().as_secs()
}

/// Returns the set with `key`, or creates one if `flags` contains `IPC_CREAT` (`semget`).
///
/// A set with [`IPC_PRIVATE`] is always created.
pub fn get_sem_set(
    ipc_ns: &IpcNamespace,
    key: key_t,
    nsems: usize,
    flags: IpcFlags,
    mode: u16,
    credentials: &Credentials,
) -> Result<IpcId> {
    if nsems > ipc_ns.sem_limits().semmsl() {
        return_errno_with_message!(Errno::EINVAL, "too many semaphores in a set");
    }

    // Lookup and creation are done under one lock, so a key never names two sets.
    let mut table = ipc_ns.sem_ids().lock_table();

    if key != IPC_PRIVATE {
        if let Some(sem_set) = table.find_by_key(key) {
            if flags.contains(IpcFlags::IPC_CREAT | IpcFlags::IPC_EXCL) {
                return_errno_with_message!(Errno::EINVAL, "the key already exists");
            }
            if nsems > sem_set.nsems() {
                return_errno_with_message!(Errno::EINVAL, "the set has fewer semaphores");
            }
            sem_set
                .permission()
                .check(credentials, PermissionMode::from_bits_truncate(mode))?;
            return Ok(sem_set.id());
        }

        if !flags.contains(IpcFlags::IPC_CREAT) {
            return_errno_with_message!(Errno::ENOENT, "no semaphore set has the key");
        }
    }

    new_sem_set(ipc_ns, &mut table, key, nsems, mode, credentials)
}

/// Creates a set with `key`, failing if a set with the key exists.
pub fn create_sem_set(
    ipc_ns: &IpcNamespace,
    key: key_t,
    nsems: usize,
    mode: u16,
    credentials: &Credentials,
) -> Result<IpcId> {
    get_sem_set(
        ipc_ns,
        key,
        nsems,
        IpcFlags::IPC_CREAT | IpcFlags::IPC_EXCL,
        mode,
        credentials,
    )
}

fn new_sem_set(
    ipc_ns: &IpcNamespace,
    table: &mut IdTable<SemaphoreSet>,
    key: key_t,
    nsems: usize,
    mode: u16,
    credentials: &Credentials,
) -> Result<IpcId> {
    let limits = ipc_ns.sem_limits();
    if nsems == 0 || nsems > limits.semmsl() {
        return_errno_with_message!(Errno::EINVAL, "invalid number of semaphores");
    }

    ipc_ns.charge_sems(nsems)?;
    let res = table.alloc(|id| {
        Ok(Arc::new(SemaphoreSet::new(
            id,
            key,
            nsems,
            mode,
            credentials,
            limits,
        )))
    });

    match res {
        Ok(id) => debug!("[new_sem_set] key = {}, nsems = {}, id = {}", key, nsems, id),
        Err(_) => ipc_ns.uncharge_sems(nsems),
    }
    res
}

/// Checks the semaphore. Returns the set if it exists and passes the check.
pub fn check_sem(
    ipc_ns: &IpcNamespace,
    id: IpcId,
    required_perm: PermissionMode,
    credentials: &Credentials,
) -> Result<Arc<SemaphoreSet>> {
    let sem_set = ipc_ns.sem_ids().lookup(id)?;
    sem_set.permission().check(credentials, required_perm)?;
    Ok(sem_set)
}

/// Removes the set `id` (`IPC_RMID`).
///
/// The identifier becomes invalid at once. Requests waiting on the set fail with
/// `EIDRM`, and the adjustments held for the set are discarded.
pub fn remove_sem_set(ipc_ns: &IpcNamespace, id: IpcId, credentials: &Credentials) -> Result<()> {
    let mut guard = ipc_ns.sem_ids().lock(id)?;
    if !guard.permission().is_owner(credentials) {
        return_errno_with_message!(Errno::EPERM, "only the owner can remove the set");
    }

    guard.remove();
    guard.destroy(ipc_ns.sem_undo_registry());
    ipc_ns.uncharge_sems(guard.nsems());

    debug!("[remove_sem_set] id = {}", id);
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ipc::semaphore::system_v::SEMVMX,
        process::{Gid, Uid},
    };

    const MODE: u16 = 0o600;

    fn user(uid: u32) -> Credentials {
        Credentials::new(Uid::new(uid), Gid::new(uid))
    }

    fn new_ns() -> Arc<IpcNamespace> {
        IpcNamespace::new(SemLimits::new(8, 10, 4, 4).unwrap())
    }

    #[test]
    fn get_or_create_by_key() {
        let ns = new_ns();
        let cred = user(1000);

        let res = get_sem_set(&ns, 42, 2, IpcFlags::empty(), MODE, &cred);
        assert_eq!(res.unwrap_err().error(), Errno::ENOENT);

        let id = get_sem_set(&ns, 42, 2, IpcFlags::IPC_CREAT, MODE, &cred).unwrap();
        assert_eq!(
            get_sem_set(&ns, 42, 1, IpcFlags::IPC_CREAT, MODE, &cred).unwrap(),
            id
        );
        assert_eq!(get_sem_set(&ns, 42, 0, IpcFlags::empty(), 0, &cred).unwrap(), id);

        let res = create_sem_set(&ns, 42, 2, MODE, &cred);
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
        let res = get_sem_set(&ns, 42, 3, IpcFlags::empty(), MODE, &cred);
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
    }

    #[test]
    fn private_key_always_creates() {
        let ns = new_ns();
        let cred = user(1000);
        let first = create_sem_set(&ns, IPC_PRIVATE, 1, MODE, &cred).unwrap();
        let second = create_sem_set(&ns, IPC_PRIVATE, 1, MODE, &cred).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn invalid_sizes() {
        let ns = new_ns();
        let cred = user(1000);
        for nsems in [0, 9] {
            let res = create_sem_set(&ns, IPC_PRIVATE, nsems, MODE, &cred);
            assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
        }
    }

    #[test]
    fn system_wide_semaphore_limit() {
        let ns = new_ns();
        let cred = user(1000);
        let id = create_sem_set(&ns, IPC_PRIVATE, 8, MODE, &cred).unwrap();

        let res = create_sem_set(&ns, IPC_PRIVATE, 3, MODE, &cred);
        assert_eq!(res.unwrap_err().error(), Errno::ENOSPC);
        assert_eq!(ns.used_sems(), 8);

        remove_sem_set(&ns, id, &cred).unwrap();
        assert_eq!(ns.used_sems(), 0);
        create_sem_set(&ns, IPC_PRIVATE, 3, MODE, &cred).unwrap();
    }

    #[test]
    fn permission_checks() {
        let ns = new_ns();
        let owner = user(1000);
        let other = user(2000);
        let id = create_sem_set(&ns, 7, 1, 0o600, &owner).unwrap();

        let res = get_sem_set(&ns, 7, 1, IpcFlags::empty(), 0o400, &other);
        assert_eq!(res.unwrap_err().error(), Errno::EACCES);
        let res = check_sem(&ns, id, PermissionMode::READ, &other);
        assert_eq!(res.unwrap_err().error(), Errno::EACCES);
        check_sem(&ns, id, PermissionMode::READ, &Credentials::new_root()).unwrap();

        let res = remove_sem_set(&ns, id, &other);
        assert_eq!(res.unwrap_err().error(), Errno::EPERM);
        remove_sem_set(&ns, id, &owner).unwrap();
    }

    #[test]
    fn removed_id_is_stale() {
        let ns = new_ns();
        let cred = user(1000);
        let id = create_sem_set(&ns, 5, 1, MODE, &cred).unwrap();
        remove_sem_set(&ns, id, &cred).unwrap();

        let new_id = create_sem_set(&ns, 5, 1, MODE, &cred).unwrap();
        assert_ne!(new_id, id);
        assert_eq!(new_id.index(), id.index());
        assert_eq!(
            check_sem(&ns, id, PermissionMode::empty(), &cred)
                .unwrap_err()
                .error(),
            Errno::ENOENT
        );
        assert_eq!(
            remove_sem_set(&ns, id, &cred).unwrap_err().error(),
            Errno::ENOENT
        );
    }

    #[test]
    fn setval_and_setall() {
        let ns = new_ns();
        let cred = user(1000);
        let registry = ns.sem_undo_registry();
        let id = create_sem_set(&ns, IPC_PRIVATE, 3, MODE, &cred).unwrap();
        let sem_set = check_sem(&ns, id, PermissionMode::ALTER, &cred).unwrap();

        sem_set.setval(1, 4, 10, registry).unwrap();
        assert_eq!(sem_set.get_all(), [0, 4, 0]);
        assert_eq!(sem_set.get(1, &Semaphore::latest_modified_pid).unwrap(), 10);

        let res = sem_set.setval(1, -1, 10, registry);
        assert_eq!(res.unwrap_err().error(), Errno::ERANGE);
        let res = sem_set.setval(3, 1, 10, registry);
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
        // A bad index is reported before a bad value.
        let res = sem_set.setval(3, SEMVMX + 1, 10, registry);
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);

        sem_set.setall(&[1, 2, 3], 11, registry).unwrap();
        assert_eq!(sem_set.get_all(), [1, 2, 3]);
        let res = sem_set.setall(&[1, 2], 11, registry);
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
        let res = sem_set.setall(&[1, 2, SEMVMX + 1], 11, registry);
        assert_eq!(res.unwrap_err().error(), Errno::ERANGE);
        assert_eq!(sem_set.get_all(), [1, 2, 3]);
    }

    #[test]
    fn stat_and_set_perm() {
        let ns = new_ns();
        let owner = user(1000);
        let id = create_sem_set(&ns, 9, 2, 0o640, &owner).unwrap();
        let sem_set = check_sem(&ns, id, PermissionMode::READ, &owner).unwrap();

        let ds = sem_set.stat();
        assert_eq!(ds.sem_perm.key, 9);
        assert_eq!(ds.sem_perm.uid, 1000);
        assert_eq!(ds.sem_perm.mode, 0o640);
        assert_eq!(ds.sem_nsems, 2);
        assert_eq!(ds.sem_otime, 0);

        let mut perm = ds.sem_perm;
        perm.uid = 3000;
        perm.mode = 0o1666;
        let res = sem_set.set_perm(&perm, &user(2000));
        assert_eq!(res.unwrap_err().error(), Errno::EPERM);

        sem_set.set_perm(&perm, &owner).unwrap();
        let ds = sem_set.stat();
        assert_eq!(ds.sem_perm.uid, 3000);
        assert_eq!(ds.sem_perm.cuid, 1000);
        assert_eq!(ds.sem_perm.mode, 0o666);
    }

    #[test]
    fn sem_info() {
        let ns = new_ns();
        let cred = user(1000);
        create_sem_set(&ns, IPC_PRIVATE, 3, MODE, &cred).unwrap();

        let info = SemInfo::new(&ns, false);
        assert_eq!(info.semmsl, 8);
        assert_eq!(info.semmns, 10);
        assert_eq!(info.semopm, 4);
        assert_eq!(info.semmni, 4);
        assert_eq!(info.semaem, SEMVMX);

        let info = SemInfo::new(&ns, true);
        assert_eq!(info.semusz, 1);
        assert_eq!(info.semaem, 3);
    }
}
