// SPDX-License-Identifier: MPL-2.0

//! Semaphore operations.
//!
//! A call to [`sem_op`] either performs all of its operations at once or none of them.
//! If the operations cannot be performed now, the caller is queued at the tail of the
//! pending queue of the set and sleeps. Whenever the semaphore values change, the queue
//! is re-evaluated from its head:
//!
//! - Requests that alter semaphore values are served in FIFO order. Once an altering
//!   request is found blocked, the altering requests queued behind it are not tried.
//! - Requests that only wait for zero are always tried, even behind a blocked altering
//!   request, since they do not compete for the right to change any value.

use super::{
    sem_set::{SemSetInner, SemaphoreSet},
    undo::SemUndoList,
    SemBuf, SemFlags,
};
use crate::{
    ipc::{ids::IpcId, PermissionMode},
    prelude::*,
    process::{signal::SigPending, Pid},
    sync::{Waiter, Waker},
};

/// A single semaphore in a set.
#[derive(Debug, Clone, Copy)]
pub struct Semaphore {
    val: i32,
    /// The PID of the process that last changed the semaphore.
    latest_modified_pid: Pid,
}

impl Semaphore {
    pub(super) const fn new(val: i32) -> Self {
        Self {
            val,
            latest_modified_pid: 0,
        }
    }

    pub fn val(&self) -> i32 {
        self.val
    }

    pub fn latest_modified_pid(&self) -> Pid {
        self.latest_modified_pid
    }

    pub(super) fn set_val(&mut self, val: i32) {
        self.val = val;
    }

    pub(super) fn set_latest_modified_pid(&mut self, pid: Pid) {
        self.latest_modified_pid = pid;
    }
}

/// The state of a [`PendingOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Status {
    /// The operations are still waiting in the queue.
    Pending,
    /// The operations have been performed.
    Normal,
    /// The semaphore set has been removed.
    Removed,
    /// The operations failed for good, e.g., because a value would go out of range.
    Error(Errno),
}

impl Status {
    fn into_result(self) -> Option<Result<()>> {
        match self {
            Status::Pending => None,
            Status::Normal => Some(Ok(())),
            Status::Removed => Some(Err(Error::with_message(
                Errno::EIDRM,
                "the semaphore set has been removed",
            ))),
            Status::Error(errno) => Some(Err(Error::new(errno))),
        }
    }
}

/// A request of semaphore operations.
///
/// A request is built for every call to [`sem_op`]. It is queued in the set if it
/// cannot be performed immediately, and whoever completes it afterwards sets its status
/// and wakes up the requester.
pub(super) struct PendingOp {
    sops: Vec<SemBuf>,
    pid: Pid,
    /// The undo list of the requester, if any operation has `SEM_UNDO`.
    undo: Option<Arc<SemUndoList>>,
    /// Whether any operation changes a semaphore value.
    alter: bool,
    status: SpinLock<Status>,
    waker: Option<Arc<Waker>>,
}

impl PendingOp {
    pub(super) fn new(
        sops: Vec<SemBuf>,
        pid: Pid,
        undo: Option<Arc<SemUndoList>>,
        waker: Option<Arc<Waker>>,
    ) -> Self {
        let alter = sops.iter().any(SemBuf::is_alter);
        Self {
            sops,
            pid,
            undo,
            alter,
            status: SpinLock::new(Status::Pending),
            waker,
        }
    }

    pub(super) fn sops_iter(&self) -> impl Iterator<Item = &SemBuf> {
        self.sops.iter()
    }

    pub(super) fn pid(&self) -> Pid {
        self.pid
    }

    pub(super) fn is_alter(&self) -> bool {
        self.alter
    }

    pub(super) fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Sets the final status. Must be called with the lock of the set held.
    pub(super) fn set_status(&self, status: Status) {
        *self.status.lock() = status;
    }

    pub(super) fn wake_up(&self) {
        if let Some(waker) = &self.waker {
            waker.wake_up();
        }
    }
}

impl Debug for PendingOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingOp")
            .field("sops", &self.sops)
            .field("pid", &self.pid)
            .field("alter", &self.alter)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Performs the operations of `op` if all of them can be performed now.
///
/// The operations are checked in order against the values that the previous operations
/// of the same request would leave. If one of them would block or fail, every value is
/// left untouched.
///
/// # Errors
///
/// - `EAGAIN` if the request has to wait.
/// - `ERANGE` if a value would exceed the maximum semaphore value, or an undo adjustment
///   would exceed `SEMAEM`.
pub(super) fn perform_atomic_semop(inner: &mut SemSetInner, op: &PendingOp) -> Result<()> {
    let semvmx = inner.semvmx;

    let mut num_applied = 0;
    let mut res = Ok(());
    for sop in op.sops_iter() {
        let sem = &mut inner.sems[sop.sem_num() as usize];
        let sem_op = sop.sem_op() as i32;
        let result = sem.val() + sem_op;

        if (sem_op == 0 && sem.val() != 0) || result < 0 {
            res = Err(Error::new(Errno::EAGAIN));
            break;
        }
        if result > semvmx {
            res = Err(Error::with_message(
                Errno::ERANGE,
                "the semaphore value would exceed SEMVMX",
            ));
            break;
        }

        sem.set_val(result);
        num_applied += 1;
    }

    if res.is_ok()
        && let Some(undo) = &op.undo
    {
        match undo.record(inner.id, inner.sems.len(), &op.sops, inner.semaem) {
            Ok(true) => {
                inner.undo_pids.insert(op.pid());
            }
            Ok(false) => {
                inner.undo_pids.remove(&op.pid());
            }
            Err(err) => res = Err(err),
        }
    }

    if let Err(err) = res {
        for sop in op.sops[..num_applied].iter().rev() {
            let sem = &mut inner.sems[sop.sem_num() as usize];
            sem.set_val(sem.val() - sop.sem_op() as i32);
        }
        return Err(err);
    }

    for sop in op.sops_iter() {
        inner.sems[sop.sem_num() as usize].set_latest_modified_pid(op.pid());
    }
    Ok(())
}

/// Re-evaluates the pending queue after semaphore values changed.
///
/// Completed requests are removed from the queue and get their final status. They are
/// returned so that their requesters can be woken up after the lock of the set is
/// released.
pub(super) fn update_pending_ops(inner: &mut SemSetInner) -> Vec<Arc<PendingOp>> {
    let mut wake_queue = Vec::new();

    'restart: loop {
        let mut is_alter_blocked = false;
        let mut index = 0;

        while index < inner.pending_ops.len() {
            let pending_op = inner.pending_ops[index].clone();
            if pending_op.is_alter() && is_alter_blocked {
                index += 1;
                continue;
            }

            match perform_atomic_semop(inner, &pending_op) {
                Ok(()) => {
                    inner.pending_ops.remove(index);
                    pending_op.set_status(Status::Normal);
                    trace!("[update_pending_ops] completed {:?}", pending_op);

                    let is_alter = pending_op.is_alter();
                    wake_queue.push(pending_op);
                    // New values may satisfy requests that have been skipped.
                    if is_alter {
                        continue 'restart;
                    }
                }
                Err(err) if err.error() == Errno::EAGAIN => {
                    if pending_op.is_alter() {
                        is_alter_blocked = true;
                    }
                    index += 1;
                }
                Err(err) => {
                    inner.pending_ops.remove(index);
                    pending_op.set_status(Status::Error(err.error()));
                    wake_queue.push(pending_op);
                }
            }
        }

        break;
    }

    wake_queue
}

/// Removes `op` from the pending queue, if it is still queued.
fn remove_pending_op(inner: &mut SemSetInner, op: &Arc<PendingOp>) -> bool {
    let Some(index) = inner
        .pending_ops
        .iter()
        .position(|pending_op| Arc::ptr_eq(pending_op, op))
    else {
        return false;
    };
    inner.pending_ops.remove(index);
    true
}

/// Performs semaphore operations on the set `sem_id` on behalf of the current process.
///
/// If any operation has [`SemFlags::IPC_NOWAIT`], the call fails with `EAGAIN` instead of
/// waiting. Otherwise it waits until the operations can be performed, the set is removed
/// (`EIDRM`), the process is interrupted (`EINTR`), or the timeout expires (`ETIMEDOUT`).
pub fn sem_op(
    sem_id: IpcId,
    sops: Vec<SemBuf>,
    timeout: Option<&Duration>,
    ctx: &Context,
) -> Result<()> {
    let process = ctx.process;
    let ipc_ns = process.ipc_ns();
    let limits = ipc_ns.sem_limits();

    if sops.is_empty() {
        return_errno_with_message!(Errno::EINVAL, "no semaphore operations are given");
    }
    if sops.len() > limits.semopm() {
        return_errno_with_message!(Errno::EINVAL, "too many semaphore operations");
    }
    if sops
        .iter()
        .any(|sop| sop.sem_op().unsigned_abs() as i32 > limits.semvmx())
    {
        return_errno_with_message!(Errno::EINVAL, "the semaphore operation exceeds SEMVMX");
    }

    let is_nowait = sops
        .iter()
        .any(|sop| sop.flags().contains(SemFlags::IPC_NOWAIT));
    let has_undo = sops
        .iter()
        .any(|sop| sop.flags().contains(SemFlags::SEM_UNDO));
    let is_alter = sops.iter().any(SemBuf::is_alter);

    let sem_set = ipc_ns.sem_ids().lookup(sem_id)?;
    if sops
        .iter()
        .any(|sop| sop.sem_num() as usize >= sem_set.nsems())
    {
        return_errno_with_message!(Errno::EINVAL, "the semaphore index is out of range");
    }

    let required_perm = if is_alter {
        PermissionMode::ALTER
    } else {
        PermissionMode::READ
    };
    sem_set
        .permission()
        .check(process.credentials(), required_perm)?;

    let (waiter, waker) = Waiter::new_pair();
    let pending_op = Arc::new(PendingOp::new(
        sops,
        process.pid(),
        has_undo.then(|| process.sem_undo().clone()),
        (!is_nowait).then_some(waker),
    ));

    let mut inner = sem_set.inner();
    if inner.is_removed {
        return_errno_with_message!(Errno::EIDRM, "the semaphore set has been removed");
    }

    match perform_atomic_semop(&mut inner, &pending_op) {
        Ok(()) => {
            sem_set.update_otime();
            if is_alter {
                sem_set.update_and_wake(inner);
            }
            return Ok(());
        }
        Err(err) if err.error() == Errno::EAGAIN => (),
        Err(err) => return Err(err),
    }

    if is_nowait {
        return_errno_with_message!(Errno::EAGAIN, "the semaphore operations would block");
    }

    inner.pending_ops.push_back(pending_op.clone());
    drop(inner);

    let wait_res = waiter.pause_until_or_timeout(
        || (pending_op.status() != Status::Pending).then_some(()),
        process.sig_pending(),
        timeout,
    );

    // The final status is decided under the lock: the request may have been completed
    // between the wake-up and now.
    let mut inner = sem_set.inner();
    if let Some(res) = settled_result(&pending_op, &wait_res, process.sig_pending()) {
        return res;
    }

    remove_pending_op(&mut inner, &pending_op);
    if pending_op.is_alter() {
        // The request may have been the one that blocked the requests behind it.
        sem_set.update_and_wake(inner);
    } else {
        drop(inner);
    }

    match wait_res {
        Err(err) if err.error() == Errno::ETIME => Err(Error::with_message(
            Errno::ETIMEDOUT,
            "the semaphore operations timed out",
        )),
        Err(err) => Err(err),
        // A completed request never returns to `Status::Pending`.
        Ok(()) => Err(Error::new(Errno::EINTR)),
    }
}

/// Returns the result of a request that was settled by another process, if it was.
///
/// A settled request reports its status even if the pause was interrupted. The interrupt
/// was consumed by the pause, so it is raised again for the next one.
fn settled_result(
    pending_op: &PendingOp,
    wait_res: &Result<()>,
    sig_pending: &SigPending,
) -> Option<Result<()>> {
    let res = pending_op.status().into_result()?;
    if wait_res
        .as_ref()
        .is_err_and(|err| err.error() == Errno::EINTR)
    {
        sig_pending.raise();
    }
    Some(res)
}

/// Counts the pending requests that wait for the semaphore `sem_num`.
///
/// With `wait_zero == false`, counts requests waiting for the value to increase; with
/// `wait_zero == true`, counts requests waiting for the value to become zero.
pub(super) fn count_waiters(inner: &SemSetInner, sem_num: u16, wait_zero: bool) -> usize {
    inner
        .pending_ops
        .iter()
        .filter(|op| {
            op.sops_iter().any(|sop| {
                let is_waiting = if wait_zero {
                    sop.sem_op() == 0
                } else {
                    sop.sem_op() < 0
                };
                sop.sem_num() == sem_num && is_waiting
            })
        })
        .count()
}

/// Applies the adjustments of an exiting process to the set.
///
/// Values are clamped to `0..=SEMVMX` rather than making the exiting process wait.
pub(super) fn apply_undo(sem_set: &SemaphoreSet, pid: Pid, semadj: &[i32]) {
    let mut inner = sem_set.inner();
    if inner.is_removed {
        return;
    }
    inner.undo_pids.remove(&pid);

    let semvmx = inner.semvmx;
    let mut is_changed = false;
    for (sem, &adj) in inner.sems.iter_mut().zip(semadj) {
        if adj == 0 {
            continue;
        }
        let val = sem.val() + adj;
        let clamped = val.clamp(0, semvmx);
        if clamped != val {
            debug!(
                "[apply_undo] pid = {}, semaphore value {} is clamped to {}",
                pid, val, clamped
            );
        }
        sem.set_val(clamped);
        sem.set_latest_modified_pid(pid);
        is_changed = true;
    }

    trace!(
        "[apply_undo] pid = {}, sem_id = {}, semadj = {:?}",
        pid,
        inner.id,
        semadj
    );

    if is_changed {
        sem_set.update_and_wake(inner);
    }
}
