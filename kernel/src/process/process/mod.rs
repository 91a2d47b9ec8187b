// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};

use super::{signal::SigPending, Credentials};
use crate::{
    ipc::{semaphore::system_v::undo::SemUndoList, IpcNamespace},
    prelude::*,
};

pub type Pid = u32;

/// A process as seen by the IPC subsystem.
///
/// Every process runs on its own thread. Blocking IPC calls park that thread, and
/// [`Process::interrupt`] may be called from any other thread to make such a call fail
/// with `EINTR`.
pub struct Process {
    pid: Pid,
    credentials: Credentials,
    ipc_ns: Arc<IpcNamespace>,
    /// The semaphore adjustments to apply when the process exits.
    ///
    /// The list is owned by the process. Semaphore sets only know the PID and reach the
    /// list through the undo registry of `ipc_ns`.
    sem_undo: Arc<SemUndoList>,
    sig_pending: SigPending,
    has_exited: AtomicBool,
}

impl Process {
    /// Creates a process and registers it in the IPC namespace.
    ///
    /// The PID must be unique within `ipc_ns` until the process exits.
    pub fn new(pid: Pid, credentials: Credentials, ipc_ns: Arc<IpcNamespace>) -> Arc<Self> {
        let sem_undo = Arc::new(SemUndoList::new(pid));
        ipc_ns.sem_undo_registry().register(&sem_undo);

        Arc::new(Self {
            pid,
            credentials,
            ipc_ns,
            sem_undo,
            sig_pending: SigPending::new(),
            has_exited: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn ipc_ns(&self) -> &Arc<IpcNamespace> {
        &self.ipc_ns
    }

    pub fn sem_undo(&self) -> &Arc<SemUndoList> {
        &self.sem_undo
    }

    pub fn sig_pending(&self) -> &SigPending {
        &self.sig_pending
    }

    /// Sends an interrupting signal to the process.
    pub fn interrupt(&self) {
        self.sig_pending.raise();
    }

    /// Exits the process, releasing its IPC resources.
    ///
    /// Only the first call has an effect.
    pub fn exit(&self) {
        super::do_exit(self);
    }

    pub fn has_exited(&self) -> bool {
        self.has_exited.load(Ordering::Acquire)
    }

    /// Marks the process as exited, returning whether it had exited before.
    pub(in crate::process) fn set_exited(&self) -> bool {
        self.has_exited.swap(true, Ordering::AcqRel)
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("credentials", &self.credentials)
            .field("has_exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}
