// SPDX-License-Identifier: MPL-2.0

//! System V semaphore sets.
//!
//! A set is created with [`sem_set::get_sem_set`], operated on with [`sem::sem_op`] and
//! controlled with the methods of [`sem_set::SemaphoreSet`]. Adjustments requested with
//! [`SemFlags::SEM_UNDO`] are kept per process by the [`undo`] module and replayed when
//! the process exits.

mod limits;
pub mod sem;
pub mod sem_set;
pub mod undo;

pub use limits::{SemLimits, SEMMNI, SEMMNS, SEMMSL, SEMOPM, SEMVMX};

use crate::prelude::*;

bitflags! {
    /// The flags of a single semaphore operation.
    pub struct SemFlags: i16 {
        /// Fail with `EAGAIN` instead of waiting.
        const IPC_NOWAIT = 0o4000;
        /// Reverse the operation when the process exits.
        const SEM_UNDO = 0x1000;
    }
}

/// A semaphore operation, laid out like `struct sembuf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SemBuf {
    sem_num: u16,
    sem_op: i16,
    sem_flg: i16,
}

impl SemBuf {
    pub const fn new(sem_num: u16, sem_op: i16, flags: SemFlags) -> Self {
        Self {
            sem_num,
            sem_op,
            sem_flg: flags.bits(),
        }
    }

    /// The index of the semaphore in the set.
    pub fn sem_num(&self) -> u16 {
        self.sem_num
    }

    /// The value to add to the semaphore, or zero to wait until it becomes zero.
    pub fn sem_op(&self) -> i16 {
        self.sem_op
    }

    /// The flags of the operation. Unknown bits are ignored.
    pub fn flags(&self) -> SemFlags {
        SemFlags::from_bits_truncate(self.sem_flg)
    }

    /// Returns whether the operation changes the semaphore value.
    pub fn is_alter(&self) -> bool {
        self.sem_op != 0
    }
}
