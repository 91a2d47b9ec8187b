// SPDX-License-Identifier: MPL-2.0

//! The System V semaphore system calls.
//!
//! Each handler decodes the raw arguments of its system call, checks them, and calls into
//! [`crate::ipc`]. Errors are returned as [`Error`]s; the caller turns them into negative
//! errno values.

pub use semctl::{sys_semctl, SemUn};
pub use semget::sys_semget;
pub use semop::{sys_semop, sys_semtimedop};

use crate::prelude::*;

mod semctl;
mod semget;
mod semop;

/// Syscall return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// return isize, this value will be used to set rax
    Return(isize),
}

impl SyscallReturn {
    /// Converts the result of a handler into the raw return value of the system call.
    pub fn into_raw(res: Result<SyscallReturn>) -> isize {
        match res {
            Ok(SyscallReturn::Return(val)) => val,
            Err(err) => {
                debug!("syscall return error: {:?}", err);
                -(err.error() as i32 as isize)
            }
        }
    }
}
