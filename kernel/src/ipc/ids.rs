// SPDX-License-Identifier: MPL-2.0

//! The identifier table shared by all kinds of System V IPC objects.
//!
//! A table is an array of slots. An occupied slot owns one IPC object. Each slot also
//! carries a sequence number that is bumped whenever the slot is emptied, and the
//! identifier handed out for an object encodes both the slot index and the sequence
//! number of the slot at allocation time:
//!
//! ```text
//! id = seq * IPCMNI + index
//! ```
//!
//! An identifier whose sequence number no longer matches its slot names an object that
//! has been removed, so a recycled slot never satisfies a stale identifier (until the
//! sequence number wraps around after `IPC_SEQ_MAX` reuses of the same slot).

use core::{fmt, ops::Deref};

use super::{key_t, IpcPermission, IPC_PRIVATE};
use crate::prelude::*;

/// The number of slot indices an identifier can encode.
pub const IPCMNI: usize = 32768;
/// The modulus of slot sequence numbers. It keeps every identifier within `i32`.
pub const IPC_SEQ_MAX: u32 = i32::MAX as u32 / IPCMNI as u32;
/// The number of slots a table starts with.
const IPC_IDS_INIT_SIZE: usize = 16;

/// The externally visible identifier of an IPC object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpcId(i32);

impl IpcId {
    /// Encodes a sequence number and a slot index.
    ///
    /// Both values are reduced by their moduli, so the function is total.
    pub const fn new(seq: u32, index: usize) -> Self {
        let seq = (seq % IPC_SEQ_MAX) as usize;
        let index = index % IPCMNI;
        Self((seq * IPCMNI + index) as i32)
    }

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Returns the slot index encoded in the identifier.
    pub const fn index(self) -> usize {
        self.0 as u32 as usize % IPCMNI
    }

    /// Returns the sequence number encoded in the identifier.
    ///
    /// The result is out of the valid range for a raw value that no table has produced.
    pub const fn seq(self) -> u32 {
        self.0 as u32 / IPCMNI as u32
    }
}

impl fmt::Display for IpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object that lives in an [`IpcIds`] table.
pub trait IpcObject: Send + Sync {
    /// Returns the permission block, which also records the object's key and identifier.
    fn permission(&self) -> &IpcPermission;
}

struct Slot<T> {
    seq: u32,
    object: Option<Arc<T>>,
}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            seq: 0,
            object: None,
        }
    }
}

/// The slot array of an [`IpcIds`] table.
///
/// Obtained with [`IpcIds::lock_table`]; holding it excludes every other access to the
/// table.
pub struct IdTable<T> {
    slots: Vec<Slot<T>>,
    /// The maximum number of slots.
    limit: usize,
    /// The number of occupied slots.
    in_use: usize,
    /// The highest index that has ever been occupied.
    max_id: Option<usize>,
}

impl<T: IpcObject> IdTable<T> {
    fn new(limit: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(IPC_IDS_INIT_SIZE.min(limit), Slot::empty);
        Self {
            slots,
            limit,
            in_use: 0,
            max_id: None,
        }
    }

    /// Returns the current capacity.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn max_id(&self) -> Option<usize> {
        self.max_id
    }

    /// Allocates a slot and fills it with the object built by `create`.
    ///
    /// `create` receives the identifier that the object will be known by. If it fails,
    /// no slot is occupied.
    ///
    /// # Errors
    ///
    /// Returns `ENOSPC` if every slot is occupied and the table cannot grow any further.
    pub fn alloc<F>(&mut self, create: F) -> Result<IpcId>
    where
        F: FnOnce(IpcId) -> Result<Arc<T>>,
    {
        if self.in_use >= self.limit {
            return_errno_with_message!(Errno::ENOSPC, "the IPC identifier table is full");
        }
        if self.in_use == self.slots.len() {
            self.grow();
        }

        let index = self
            .slots
            .iter()
            .position(|slot| slot.object.is_none())
            .ok_or(Error::with_message(
                Errno::ENOSPC,
                "the IPC identifier table is full",
            ))?;
        let id = IpcId::new(self.slots[index].seq, index);

        let object = create(id)?;
        debug_assert_eq!(object.permission().id(), id);

        self.slots[index].object = Some(object);
        self.in_use += 1;
        self.max_id = Some(self.max_id.map_or(index, |max_id| max_id.max(index)));

        trace!("[ipc_ids] alloc id = {}, in_use = {}", id, self.in_use);
        Ok(id)
    }

    /// Doubles the capacity, bounded by the limit. Existing indices are preserved.
    fn grow(&mut self) {
        let new_size = (self.slots.len() * 2)
            .max(IPC_IDS_INIT_SIZE)
            .min(self.limit);
        self.slots.resize_with(new_size, Slot::empty);
    }

    /// Finds the object created with `key`.
    ///
    /// Objects created with [`IPC_PRIVATE`] are never found by key.
    pub fn find_by_key(&self, key: key_t) -> Option<&Arc<T>> {
        if key == IPC_PRIVATE {
            return None;
        }
        self.iter().find(|object| object.permission().key() == key)
    }

    /// Looks up the object named by `id`.
    ///
    /// # Errors
    ///
    /// Returns `ENOENT` if the slot is empty or has been reused since `id` was issued.
    pub fn lookup(&self, id: IpcId) -> Result<&Arc<T>> {
        let slot = self
            .slots
            .get(id.index())
            .filter(|slot| slot.seq == id.seq())
            .ok_or(Error::with_message(
                Errno::ENOENT,
                "the identifier does not name a live IPC object",
            ))?;
        slot.object.as_ref().ok_or(Error::with_message(
            Errno::ENOENT,
            "the identifier does not name a live IPC object",
        ))
    }

    /// Returns the object in the slot at `index`, whatever its sequence number.
    pub fn get_by_index(&self, index: usize) -> Option<&Arc<T>> {
        self.slots.get(index)?.object.as_ref()
    }

    /// Removes the object named by `id` and hands it over to the caller.
    ///
    /// The slot's sequence number is bumped so that `id` never becomes valid again
    /// until the sequence number wraps around.
    pub fn remove(&mut self, id: IpcId) -> Result<Arc<T>> {
        self.lookup(id)?;

        let slot = &mut self.slots[id.index()];
        let object = slot.object.take();
        slot.seq = (slot.seq + 1) % IPC_SEQ_MAX;
        self.in_use -= 1;

        trace!("[ipc_ids] remove id = {}, in_use = {}", id, self.in_use);
        object.ok_or(Error::new(Errno::ENOENT))
    }

    /// Iterates over the live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.slots.iter().filter_map(|slot| slot.object.as_ref())
    }
}

/// A table mapping [`IpcId`]s to IPC objects of type `T`.
///
/// All slot operations run under a single table-wide lock. The lock only protects slot
/// occupancy; the state of an object is protected by the object's own locks, which are
/// always acquired after the table lock when both are needed.
pub struct IpcIds<T> {
    table: SpinLock<IdTable<T>>,
}

impl<T: IpcObject> IpcIds<T> {
    /// Creates a table that holds at most `limit` objects.
    ///
    /// The limit is capped at [`IPCMNI`], the number of indices an identifier can encode.
    pub fn new(limit: usize) -> Self {
        Self {
            table: SpinLock::new(IdTable::new(limit.min(IPCMNI))),
        }
    }

    /// Acquires the table lock.
    pub fn lock_table(&self) -> SpinLockGuard<'_, IdTable<T>> {
        self.table.lock()
    }

    /// Acquires the table lock and looks up `id`.
    ///
    /// The object cannot be removed by others while the returned guard is alive.
    pub fn lock(&self, id: IpcId) -> Result<IpcIdsGuard<'_, T>> {
        let table = self.table.lock();
        let object = table.lookup(id)?.clone();
        Ok(IpcIdsGuard {
            table,
            id,
            object,
            is_removed: false,
        })
    }

    pub fn alloc<F>(&self, create: F) -> Result<IpcId>
    where
        F: FnOnce(IpcId) -> Result<Arc<T>>,
    {
        self.table.lock().alloc(create)
    }

    pub fn find_by_key(&self, key: key_t) -> Option<Arc<T>> {
        self.table.lock().find_by_key(key).cloned()
    }

    pub fn lookup(&self, id: IpcId) -> Result<Arc<T>> {
        self.table.lock().lookup(id).cloned()
    }

    pub fn remove(&self, id: IpcId) -> Result<Arc<T>> {
        self.table.lock().remove(id)
    }

    pub fn in_use(&self) -> usize {
        self.table.lock().in_use()
    }
}

/// A locked table together with one of its objects.
///
/// See [`IpcIds::lock`].
pub struct IpcIdsGuard<'a, T> {
    table: SpinLockGuard<'a, IdTable<T>>,
    id: IpcId,
    object: Arc<T>,
    is_removed: bool,
}

impl<T: IpcObject> IpcIdsGuard<'_, T> {
    /// Removes the object from the table.
    ///
    /// The table stays locked until the guard is dropped, so the caller can tear the
    /// object down before anyone else observes the table again.
    pub fn remove(&mut self) {
        if self.is_removed {
            return;
        }
        // The lookup in `IpcIds::lock` succeeded and the table has been locked since.
        let _ = self.table.remove(self.id);
        self.is_removed = true;
    }
}

impl<T> Deref for IpcIdsGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::Credentials;

    #[derive(Debug)]
    struct Dummy {
        permission: IpcPermission,
    }

    impl IpcObject for Dummy {
        fn permission(&self) -> &IpcPermission {
            &self.permission
        }
    }

    fn alloc_dummy(ids: &IpcIds<Dummy>, key: key_t) -> Result<IpcId> {
        ids.alloc(|id| {
            Ok(Arc::new(Dummy {
                permission: IpcPermission::new(key, id, &Credentials::new_root(), 0o600),
            }))
        })
    }

    #[test]
    fn id_encoding() {
        let id = IpcId::new(3, 17);
        assert_eq!(id.as_raw(), 3 * IPCMNI as i32 + 17);
        assert_eq!(id.seq(), 3);
        assert_eq!(id.index(), 17);

        let last = IpcId::new(IPC_SEQ_MAX - 1, IPCMNI - 1);
        assert!(last.as_raw() > 0);
        assert_eq!(last.seq(), IPC_SEQ_MAX - 1);
        assert_eq!(last.index(), IPCMNI - 1);

        assert_eq!(IpcId::new(IPC_SEQ_MAX, 5), IpcId::new(0, 5));
        assert_eq!(IpcId::from_raw(id.as_raw()), id);
    }

    #[test]
    fn reused_slot_gets_new_id() {
        let ids = IpcIds::new(8);
        let old_id = alloc_dummy(&ids, 1).unwrap();
        ids.remove(old_id).unwrap();

        let new_id = alloc_dummy(&ids, 1).unwrap();
        assert_eq!(new_id.index(), old_id.index());
        assert_ne!(new_id, old_id);

        assert_eq!(ids.lookup(old_id).unwrap_err().error(), Errno::ENOENT);
        assert!(ids.lookup(new_id).is_ok());
    }

    #[test]
    fn remove_twice_fails() {
        let ids = IpcIds::new(8);
        let id = alloc_dummy(&ids, 1).unwrap();
        ids.remove(id).unwrap();
        assert_eq!(ids.remove(id).unwrap_err().error(), Errno::ENOENT);
        assert_eq!(ids.in_use(), 0);
    }

    #[test]
    fn lookup_of_unknown_id_fails() {
        let ids: IpcIds<Dummy> = IpcIds::new(8);
        assert!(ids.lookup(IpcId::new(0, 0)).is_err());
        assert!(ids.lookup(IpcId::new(0, IPCMNI - 1)).is_err());
        assert!(ids.lookup(IpcId::from_raw(-1)).is_err());
    }

    #[test]
    fn table_grows_and_keeps_indices() {
        let ids = IpcIds::new(100);
        assert_eq!(ids.lock_table().size(), IPC_IDS_INIT_SIZE);

        let allocated: Vec<IpcId> = (0..40).map(|key| alloc_dummy(&ids, key + 1).unwrap()).collect();
        {
            let table = ids.lock_table();
            assert_eq!(table.size(), 64);
            assert_eq!(table.in_use(), 40);
            assert_eq!(table.max_id(), Some(39));
        }
        for (index, id) in allocated.iter().enumerate() {
            assert_eq!(id.index(), index);
            assert_eq!(ids.lookup(*id).unwrap().permission().key(), index as key_t + 1);
        }
    }

    #[test]
    fn table_full() {
        let ids = IpcIds::new(3);
        for key in 1..=3 {
            alloc_dummy(&ids, key).unwrap();
        }
        assert_eq!(ids.lock_table().size(), 3);
        assert_eq!(alloc_dummy(&ids, 4).unwrap_err().error(), Errno::ENOSPC);
    }

    #[test]
    fn failed_creation_leaves_slot_empty() {
        let ids: IpcIds<Dummy> = IpcIds::new(4);
        let res = ids.alloc(|_| Err(Error::new(Errno::EINVAL)));
        assert_eq!(res.unwrap_err().error(), Errno::EINVAL);
        assert_eq!(ids.in_use(), 0);
        assert_eq!(alloc_dummy(&ids, 1).unwrap().index(), 0);
    }

    #[test]
    fn find_by_key() {
        let ids = IpcIds::new(8);
        let id = alloc_dummy(&ids, 42).unwrap();
        alloc_dummy(&ids, IPC_PRIVATE).unwrap();

        assert_eq!(ids.find_by_key(42).unwrap().permission().id(), id);
        assert!(ids.find_by_key(43).is_none());
        assert!(ids.find_by_key(IPC_PRIVATE).is_none());

        ids.remove(id).unwrap();
        assert!(ids.find_by_key(42).is_none());
    }

    #[test]
    fn guard_removes_under_lock() {
        let ids = IpcIds::new(8);
        let id = alloc_dummy(&ids, 7).unwrap();

        let mut guard = ids.lock(id).unwrap();
        assert_eq!(guard.permission().key(), 7);
        guard.remove();
        guard.remove();
        drop(guard);

        assert!(ids.lookup(id).is_err());
        assert_eq!(ids.in_use(), 0);
    }
}
