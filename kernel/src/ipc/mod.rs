// SPDX-License-Identifier: MPL-2.0

//! System V inter-process communication.
//!
//! Every kind of System V IPC object lives in an identifier table ([`ids::IpcIds`]) of an
//! [`IpcNamespace`]. Semaphore sets are the only kind of object implemented so far.

pub mod ids;
mod namespace;
mod perm;
pub mod semaphore;

pub use namespace::IpcNamespace;
pub use perm::{check_permission, IpcPerm, IpcPermission, PermissionMode};

use crate::prelude::*;

#[expect(non_camel_case_types)]
pub type key_t = i32;

/// The key that always creates a new object.
pub const IPC_PRIVATE: key_t = 0;

/// The flag in a control command that selects the 64-bit layout. It is accepted and ignored,
/// so callers strip it before converting the command.
pub const IPC_64: i32 = 0x0100;

bitflags! {
    /// The flags that can be combined with the mode bits in the `*get` calls.
    pub struct IpcFlags: u32 {
        /// Create the object if the key does not exist.
        const IPC_CREAT  = 0o1000;
        /// Fail if the key exists.
        const IPC_EXCL   = 0o2000;
    }
}

/// The commands of the `*ctl` calls.
#[expect(non_camel_case_types)]
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
pub enum IpcControlCmd {
    IPC_RMID = 0,
    IPC_SET = 1,
    IPC_STAT = 2,
    IPC_INFO = 3,

    SEM_GETPID = 11,
    SEM_GETVAL = 12,
    SEM_GETALL = 13,
    SEM_GETNCNT = 14,
    SEM_GETZCNT = 15,
    SEM_SETVAL = 16,
    SEM_SETALL = 17,
    SEM_STAT = 18,
    SEM_INFO = 19,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn control_cmd_from_int() {
        assert_eq!(IpcControlCmd::try_from(0).unwrap(), IpcControlCmd::IPC_RMID);
        assert_eq!(
            IpcControlCmd::try_from(13).unwrap(),
            IpcControlCmd::SEM_GETALL
        );
        assert!(IpcControlCmd::try_from(7).is_err());
        assert!(IpcControlCmd::try_from(IPC_64 | 13).is_err());
        assert_eq!(
            Error::from(IpcControlCmd::try_from(7).unwrap_err()).error(),
            Errno::EINVAL
        );
    }
}
