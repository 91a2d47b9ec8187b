// SPDX-License-Identifier: MPL-2.0

use super::SyscallReturn;
use crate::{
    ipc::{
        ids::IpcId,
        semaphore::system_v::{sem::sem_op, SemBuf},
    },
    prelude::*,
};

pub fn sys_semop(sem_id: i32, sops: &[SemBuf], ctx: &Context) -> Result<SyscallReturn> {
    debug!("[sys_semop] sem_id = {}, nsops = {}", sem_id, sops.len());
    do_sys_semtimedop(sem_id, sops, None, ctx)
}

/// Like [`sys_semop`], but gives up with `ETIMEDOUT` once `timeout` has passed.
pub fn sys_semtimedop(
    sem_id: i32,
    sops: &[SemBuf],
    timeout: Option<&Duration>,
    ctx: &Context,
) -> Result<SyscallReturn> {
    debug!(
        "[sys_semtimedop] sem_id = {}, nsops = {}, timeout = {:?}",
        sem_id,
        sops.len(),
        timeout
    );
    do_sys_semtimedop(sem_id, sops, timeout, ctx)
}

fn do_sys_semtimedop(
    sem_id: i32,
    sops: &[SemBuf],
    timeout: Option<&Duration>,
    ctx: &Context,
) -> Result<SyscallReturn> {
    if sem_id < 0 {
        return_errno_with_message!(Errno::EINVAL, "invalid semaphore ID");
    }

    sem_op(IpcId::from_raw(sem_id), sops.to_vec(), timeout, ctx)?;
    Ok(SyscallReturn::Return(0))
}
