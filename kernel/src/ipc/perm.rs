// SPDX-License-Identifier: MPL-2.0

use super::{ids::IpcId, key_t};
use crate::{
    prelude::*,
    process::{Credentials, Gid, Uid},
};

bitflags! {
    /// The access requested from an IPC object.
    ///
    /// The bits use the layout of the permission bits in a mode: a request may be written
    /// for any of the owner, group and other classes and is checked against the class that
    /// applies to the caller.
    pub struct PermissionMode: u16 {
        const READ  = 0o444;
        const ALTER = 0o222;
    }
}

/// The ownership and permission block of an IPC object.
///
/// The key, the creator and the identifier are fixed when the object is created. The
/// owner and the mode can be changed later with `IPC_SET`.
#[derive(Debug)]
pub struct IpcPermission {
    key: key_t,
    id: IpcId,
    /// Creator's uid
    cuid: Uid,
    /// Creator's gid
    cgid: Gid,
    owner: SpinLock<IpcOwner>,
}

#[derive(Debug, Clone, Copy)]
struct IpcOwner {
    uid: Uid,
    gid: Gid,
    mode: u16,
}

/// A snapshot of an [`IpcPermission`], laid out like `struct ipc64_perm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IpcPerm {
    /// Key
    pub key: key_t,
    /// Owner's user ID
    pub uid: u32,
    /// Owner's group ID
    pub gid: u32,
    /// Creator's user ID
    pub cuid: u32,
    /// Creator's group ID
    pub cgid: u32,
    /// Read/write permission
    pub mode: u16,
    /// Sequence number
    pub seq: u16,
}

impl IpcPermission {
    /// Creates the permission block of a new object, owned by its creator.
    pub fn new(key: key_t, id: IpcId, credentials: &Credentials, mode: u16) -> Self {
        let uid = credentials.euid();
        let gid = credentials.egid();
        Self {
            key,
            id,
            cuid: uid,
            cgid: gid,
            owner: SpinLock::new(IpcOwner {
                uid,
                gid,
                mode: mode & 0o777,
            }),
        }
    }

    pub fn key(&self) -> key_t {
        self.key
    }

    pub fn id(&self) -> IpcId {
        self.id
    }

    /// Returns the sequence number recorded when the object was created.
    pub fn seq(&self) -> u32 {
        self.id.seq()
    }

    pub fn uid(&self) -> Uid {
        self.owner.lock().uid
    }

    pub fn gid(&self) -> Gid {
        self.owner.lock().gid
    }

    pub fn cuid(&self) -> Uid {
        self.cuid
    }

    pub fn cgid(&self) -> Gid {
        self.cgid
    }

    pub fn mode(&self) -> u16 {
        self.owner.lock().mode
    }

    /// Checks whether `credentials` grant the `required` access.
    pub fn check(&self, credentials: &Credentials, required: PermissionMode) -> Result<()> {
        let owner = *self.owner.lock();
        let granted = check_permission(
            owner.mode,
            (owner.uid, owner.gid),
            (self.cuid, self.cgid),
            credentials,
            required,
        );
        if !granted {
            return_errno_with_message!(Errno::EACCES, "the IPC object denies the access");
        }
        Ok(())
    }

    /// Returns whether `credentials` may run owner-only commands such as `IPC_RMID`.
    pub fn is_owner(&self, credentials: &Credentials) -> bool {
        let euid = credentials.euid();
        euid.is_root() || euid == self.uid() || euid == self.cuid
    }

    /// Changes the owner and the permission bits.
    pub fn set_owner(&self, uid: Uid, gid: Gid, mode: u16) {
        let mut owner = self.owner.lock();
        owner.uid = uid;
        owner.gid = gid;
        owner.mode = mode & 0o777;
    }

    pub fn to_ipc_perm(&self) -> IpcPerm {
        let owner = *self.owner.lock();
        IpcPerm {
            key: self.key,
            uid: owner.uid.into(),
            gid: owner.gid.into(),
            cuid: self.cuid.into(),
            cgid: self.cgid.into(),
            mode: owner.mode,
            seq: self.seq() as u16,
        }
    }
}

/// Checks a requested access against an owner/group/other permission triple.
///
/// The class is picked from the caller's effective IDs: the owner class if the caller
/// is the owner or the creator, else the group class if the caller's group is the owner's
/// or the creator's group, else the other class. The superuser is always granted access.
pub fn check_permission(
    mode: u16,
    (uid, gid): (Uid, Gid),
    (cuid, cgid): (Uid, Gid),
    credentials: &Credentials,
    required: PermissionMode,
) -> bool {
    let euid = credentials.euid();
    let egid = credentials.egid();

    let class_bits = if euid == uid || euid == cuid {
        mode >> 6
    } else if egid == gid || egid == cgid {
        mode >> 3
    } else {
        mode
    };
    let granted = class_bits & 0o7;

    let bits = required.bits();
    let requested = ((bits >> 6) | (bits >> 3) | bits) & 0o7;

    requested & !granted == 0 || euid.is_root()
}

#[cfg(test)]
mod test {
    use super::*;

    const OWNER: (Uid, Gid) = (Uid::new(1000), Gid::new(100));
    const CREATOR: (Uid, Gid) = (Uid::new(1001), Gid::new(101));

    fn creds(uid: u32, gid: u32) -> Credentials {
        Credentials::new(Uid::new(uid), Gid::new(gid))
    }

    #[test]
    fn owner_class_is_used_for_owner_and_creator() {
        let mode = 0o600;
        for caller in [creds(1000, 7), creds(1001, 7)] {
            assert!(check_permission(mode, OWNER, CREATOR, &caller, PermissionMode::READ));
            assert!(check_permission(mode, OWNER, CREATOR, &caller, PermissionMode::ALTER));
        }
    }

    #[test]
    fn group_class_is_used_for_group_members() {
        let mode = 0o640;
        let member = creds(2000, 100);
        assert!(check_permission(mode, OWNER, CREATOR, &member, PermissionMode::READ));
        assert!(!check_permission(mode, OWNER, CREATOR, &member, PermissionMode::ALTER));
    }

    #[test]
    fn other_class_is_used_for_everyone_else() {
        let stranger = creds(3000, 300);
        assert!(!check_permission(0o660, OWNER, CREATOR, &stranger, PermissionMode::READ));
        assert!(check_permission(0o664, OWNER, CREATOR, &stranger, PermissionMode::READ));
        assert!(check_permission(0o600, OWNER, CREATOR, &stranger, PermissionMode::empty()));
    }

    #[test]
    fn owner_class_does_not_fall_back_to_other() {
        // An owner without owner bits is denied even if "other" may read.
        let owner = creds(1000, 100);
        assert!(!check_permission(0o004, OWNER, CREATOR, &owner, PermissionMode::READ));
    }

    #[test]
    fn root_is_always_granted() {
        let root = Credentials::new_root();
        assert!(check_permission(0, OWNER, CREATOR, &root, PermissionMode::all()));
    }

    #[test]
    fn permission_block_checks_and_updates() {
        let creator = creds(1000, 100);
        let perm = IpcPermission::new(42, IpcId::new(3, 5), &creator, 0o1600);
        assert_eq!(perm.mode(), 0o600);
        assert_eq!(perm.seq(), 3);

        let other = creds(2000, 200);
        assert_eq!(
            perm.check(&other, PermissionMode::READ).unwrap_err().error(),
            Errno::EACCES
        );
        assert!(!perm.is_owner(&other));

        perm.set_owner(Uid::new(2000), Gid::new(200), 0o400);
        assert!(perm.check(&other, PermissionMode::READ).is_ok());
        assert!(perm.check(&other, PermissionMode::ALTER).is_err());
        // The creator keeps owner rights after the ownership changed.
        assert!(perm.is_owner(&creator));

        let snapshot = perm.to_ipc_perm();
        assert_eq!(snapshot.key, 42);
        assert_eq!(snapshot.uid, 2000);
        assert_eq!(snapshot.cuid, 1000);
        assert_eq!(snapshot.seq, 3);
    }
}
