// SPDX-License-Identifier: MPL-2.0

mod group;
mod user;

pub use group::Gid;
pub use user::Uid;

/// The user and group identity that a process presents to permission checks.
///
/// Only the effective IDs take part in IPC permission checks, so this type does not
/// track the real, saved-set or filesystem IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    euid: Uid,
    egid: Gid,
}

impl Credentials {
    pub const fn new(euid: Uid, egid: Gid) -> Self {
        Self { euid, egid }
    }

    /// Credentials of the superuser, which pass every IPC permission check.
    pub const fn new_root() -> Self {
        Self::new(Uid::new_root(), Gid::new_root())
    }

    /// Gets effective user id.
    pub fn euid(&self) -> Uid {
        self.euid
    }

    /// Gets effective group id.
    pub fn egid(&self) -> Gid {
        self.egid
    }
}
