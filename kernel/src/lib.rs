// SPDX-License-Identifier: MPL-2.0

//! System V IPC identifiers and semaphore sets.
//!
//! Semaphore sets live in an [`IpcNamespace`] and are named by [`IpcId`]s that are never
//! reused while a stale copy could still be around. Processes operate on them through
//! the system call handlers in [`syscall`]:
//!
//! - `semget` finds or creates a set by key.
//! - `semop` and `semtimedop` perform a group of operations atomically, waiting in a FIFO
//!   queue if needed. Operations with `SEM_UNDO` are reverted when the process exits.
//! - `semctl` reads, sets and removes sets.
//!
//! Every process runs on its own thread. Waiting parks the thread.
//!
//! [`IpcId`]: ipc::ids::IpcId
#![deny(unsafe_code)]

extern crate alloc;

pub mod context;
pub mod error;
pub mod ipc;
mod prelude;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod time;

pub use self::{
    context::Context,
    error::{Errno, Error},
    ipc::IpcNamespace,
    prelude::Result,
};
