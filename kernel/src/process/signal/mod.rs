// SPDX-License-Identifier: MPL-2.0

//! Interrupting signals.
//!
//! The IPC subsystem only cares whether a blocked process has been asked to give up
//! waiting. A [`SigPending`] records that request and wakes the thread that is currently
//! paused on behalf of the process, if any.

mod pause;

use core::sync::atomic::{AtomicBool, Ordering};

pub use pause::Pause;

use crate::{prelude::*, sync::Waker};

/// The pending-interrupt state of a process.
#[derive(Debug, Default)]
pub struct SigPending {
    has_pending: AtomicBool,
    observer: SpinLock<Option<Arc<Waker>>>,
}

impl SigPending {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an interrupting signal.
    ///
    /// If the process is paused, it resumes and its pause fails with `EINTR`. Otherwise the
    /// signal stays pending and the next pause fails immediately.
    pub fn raise(&self) {
        self.has_pending.store(true, Ordering::Release);
        if let Some(waker) = self.observer.lock().as_ref() {
            waker.wake_up();
        }
    }

    /// Returns whether a signal is pending.
    pub fn has_pending(&self) -> bool {
        self.has_pending.load(Ordering::Acquire)
    }

    /// Consumes the pending signal, returning whether there was one.
    pub(crate) fn dequeue(&self) -> bool {
        self.has_pending.swap(false, Ordering::AcqRel)
    }

    fn register_observer(&self, waker: Arc<Waker>) {
        *self.observer.lock() = Some(waker);
    }

    fn unregister_observer(&self) {
        self.observer.lock().take();
    }
}
