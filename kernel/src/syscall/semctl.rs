// SPDX-License-Identifier: MPL-2.0

use super::SyscallReturn;
use crate::{
    ipc::{
        ids::IpcId,
        semaphore::system_v::{
            sem::Semaphore,
            sem_set::{check_sem, remove_sem_set, SemInfo, SemaphoreSet, SemidDs},
        },
        IpcControlCmd, IpcPerm, PermissionMode, IPC_64,
    },
    prelude::*,
    process::Pid,
};

/// The fourth argument of `semctl`, like `union semun`.
///
/// Which variant a command expects is fixed by the command. A mismatch fails with
/// `EINVAL`.
#[derive(Debug)]
pub enum SemUn<'a> {
    None,
    /// `SETVAL`
    Val(i32),
    /// `GETALL` and `SETALL`. Must hold one value per semaphore.
    Array(&'a mut [u16]),
    /// `IPC_STAT`, `SEM_STAT` and `IPC_SET`
    Buf(&'a mut SemidDs),
    /// `IPC_INFO` and `SEM_INFO`
    Info(&'a mut SemInfo),
}

pub fn sys_semctl(
    semid: i32,
    semnum: i32,
    cmd: i32,
    arg: SemUn,
    ctx: &Context,
) -> Result<SyscallReturn> {
    if semid < 0 || semnum < 0 {
        return_errno!(Errno::EINVAL)
    }

    let cmd = IpcControlCmd::try_from(cmd & !IPC_64)
        .map_err(|_| Error::with_message(Errno::EINVAL, "invalid IPC control command"))?;
    debug!(
        "[sys_semctl] semid = {}, semnum = {}, cmd = {:?}, arg = {:?}",
        semid, semnum, cmd, arg
    );

    let ipc_ns = ctx.process.ipc_ns();
    let credentials = ctx.process.credentials();
    let sem_id = IpcId::from_raw(semid);

    match (cmd, arg) {
        (IpcControlCmd::IPC_RMID, _) => {
            remove_sem_set(ipc_ns, sem_id, credentials)?;
        }
        (IpcControlCmd::IPC_SET, SemUn::Buf(buf)) => {
            let perm: IpcPerm = buf.sem_perm;
            let sem_set = ipc_ns.sem_ids().lookup(sem_id)?;
            sem_set.set_perm(&perm, credentials)?;
        }
        (IpcControlCmd::IPC_STAT, SemUn::Buf(buf)) => {
            *buf = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                Ok(sem_set.stat())
            })?;
        }
        (IpcControlCmd::SEM_STAT, SemUn::Buf(buf)) => {
            // The argument is a slot index rather than an identifier.
            let sem_set = ipc_ns
                .sem_ids()
                .lock_table()
                .get_by_index(semid as usize)
                .cloned()
                .ok_or(Error::with_message(Errno::EINVAL, "the slot is empty"))?;
            sem_set.permission().check(credentials, PermissionMode::READ)?;
            *buf = sem_set.stat();

            return Ok(SyscallReturn::Return(sem_set.id().as_raw() as isize));
        }
        (IpcControlCmd::IPC_INFO | IpcControlCmd::SEM_INFO, SemUn::Info(info)) => {
            *info = SemInfo::new(ipc_ns, cmd == IpcControlCmd::SEM_INFO);
            let max_id = ipc_ns.sem_ids().lock_table().max_id().unwrap_or(0);

            return Ok(SyscallReturn::Return(max_id as isize));
        }
        (IpcControlCmd::SEM_SETVAL, SemUn::Val(val)) => {
            check_and_ctl(sem_id, PermissionMode::ALTER, ctx, |sem_set| {
                sem_set.setval(
                    semnum as usize,
                    val,
                    ctx.process.pid(),
                    ipc_ns.sem_undo_registry(),
                )
            })?;
        }
        (IpcControlCmd::SEM_SETALL, SemUn::Array(array)) => {
            let vals: Vec<i32> = array.iter().map(|&val| val as i32).collect();
            check_and_ctl(sem_id, PermissionMode::ALTER, ctx, |sem_set| {
                sem_set.setall(&vals, ctx.process.pid(), ipc_ns.sem_undo_registry())
            })?;
        }
        (IpcControlCmd::SEM_GETALL, SemUn::Array(array)) => {
            let vals = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                Ok(sem_set.get_all())
            })?;
            if array.len() != vals.len() {
                return_errno_with_message!(Errno::EINVAL, "the array has a wrong length");
            }
            for (dst, val) in array.iter_mut().zip(vals) {
                *dst = val as u16;
            }
        }
        (IpcControlCmd::SEM_GETVAL, _) => {
            fn sem_val(sem: &Semaphore) -> i32 {
                sem.val()
            }
            let val: i32 = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                sem_set.get(semnum as usize, &sem_val)
            })?;

            return Ok(SyscallReturn::Return(val as isize));
        }
        (IpcControlCmd::SEM_GETPID, _) => {
            fn sem_pid(sem: &Semaphore) -> Pid {
                sem.latest_modified_pid()
            }
            let pid: Pid = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                sem_set.get(semnum as usize, &sem_pid)
            })?;

            return Ok(SyscallReturn::Return(pid as isize));
        }
        (IpcControlCmd::SEM_GETZCNT, _) => {
            let cnt: usize = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                check_sem_num(sem_set, semnum)?;
                Ok(sem_set.pending_const_count(semnum as u16))
            })?;

            return Ok(SyscallReturn::Return(cnt as isize));
        }
        (IpcControlCmd::SEM_GETNCNT, _) => {
            let cnt: usize = check_and_ctl(sem_id, PermissionMode::READ, ctx, |sem_set| {
                check_sem_num(sem_set, semnum)?;
                Ok(sem_set.pending_alter_count(semnum as u16))
            })?;

            return Ok(SyscallReturn::Return(cnt as isize));
        }
        (cmd, arg) => {
            debug!("[sys_semctl] {:?} does not take {:?}", cmd, arg);
            return_errno_with_message!(Errno::EINVAL, "the argument does not match the command");
        }
    }

    Ok(SyscallReturn::Return(0))
}

fn check_and_ctl<T, F>(
    sem_id: IpcId,
    permission: PermissionMode,
    ctx: &Context,
    ctl_func: F,
) -> Result<T>
where
    F: FnOnce(&SemaphoreSet) -> Result<T>,
{
    let sem_set = check_sem(
        ctx.process.ipc_ns(),
        sem_id,
        permission,
        ctx.process.credentials(),
    )?;
    ctl_func(&sem_set)
}

fn check_sem_num(sem_set: &SemaphoreSet, semnum: i32) -> Result<()> {
    if semnum as usize >= sem_set.nsems() {
        return_errno_with_message!(Errno::EINVAL, "the semaphore index is out of range");
    }
    Ok(())
}
