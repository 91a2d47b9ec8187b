// SPDX-License-Identifier: MPL-2.0

use super::SyscallReturn;
use crate::{
    ipc::{key_t, semaphore::system_v::sem_set::get_sem_set, IpcFlags},
    prelude::*,
};

pub fn sys_semget(key: key_t, nsems: i32, semflags: i32, ctx: &Context) -> Result<SyscallReturn> {
    debug!(
        "[sys_semget] key = {}, nsems = {}, flags = {:o}",
        key, nsems, semflags
    );

    let ipc_ns = ctx.process.ipc_ns();
    let nsems = usize::try_from(nsems)
        .ok()
        .filter(|&nsems| nsems <= ipc_ns.sem_limits().semmsl())
        .ok_or(Error::with_message(Errno::EINVAL, "invalid number of semaphores"))?;

    let flags = IpcFlags::from_bits_truncate(semflags as u32);
    let mode = (semflags as u32 & 0o777) as u16;

    let id = get_sem_set(
        ipc_ns,
        key,
        nsems,
        flags,
        mode,
        ctx.process.credentials(),
    )?;

    Ok(SyscallReturn::Return(id.as_raw() as isize))
}
