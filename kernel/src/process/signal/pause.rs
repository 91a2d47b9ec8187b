// SPDX-License-Identifier: MPL-2.0

use std::time::Instant;

use super::SigPending;
use crate::{prelude::*, sync::Waiter};

/// `Pause` is an extension trait to make [`Waiter`] signal-aware.
///
/// By using methods of `Pause`, a thread can be paused until a condition is met, a signal
/// is delivered to its process, or a timeout expires.
pub trait Pause {
    /// Pauses until the condition is met or a signal interrupts the current thread.
    ///
    /// # Errors
    ///
    /// This method will return an error with [`EINTR`] if a signal is received before the
    /// condition is met.
    ///
    /// [`EINTR`]: crate::error::Errno::EINTR
    fn pause_until<F, R>(&self, cond: F, sig_pending: &SigPending) -> Result<R>
    where
        F: FnMut() -> Option<R>,
    {
        self.pause_until_or_timeout(cond, sig_pending, None)
    }

    /// Pauses until the condition is met, a signal interrupts the current thread, or the
    /// timeout expires.
    ///
    /// # Errors
    ///
    /// This method will return an error with [`ETIME`] if the timeout expires before the
    /// condition is met, or with [`EINTR`] if a signal is received first. A pending signal is
    /// consumed when it makes this method fail.
    ///
    /// [`ETIME`]: crate::error::Errno::ETIME
    /// [`EINTR`]: crate::error::Errno::EINTR
    fn pause_until_or_timeout<F, R>(
        &self,
        cond: F,
        sig_pending: &SigPending,
        timeout: Option<&Duration>,
    ) -> Result<R>
    where
        F: FnMut() -> Option<R>;
}

impl Pause for Waiter {
    fn pause_until_or_timeout<F, R>(
        &self,
        mut cond: F,
        sig_pending: &SigPending,
        timeout: Option<&Duration>,
    ) -> Result<R>
    where
        F: FnMut() -> Option<R>,
    {
        // Fast path
        if let Some(res) = cond() {
            return Ok(res);
        }

        // A timeout too large to be represented never expires.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(*timeout));

        sig_pending.register_observer(self.waker());

        let cancel_cond = || {
            if sig_pending.has_pending() {
                return_errno_with_message!(Errno::EINTR, "the current thread is interrupted");
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return_errno_with_message!(Errno::ETIME, "the timeout expired");
            }
            Ok(())
        };

        let res = self.wait_until_or_cancelled(cond, cancel_cond, deadline);

        sig_pending.unregister_observer();
        if res
            .as_ref()
            .is_err_and(|err| err.error() == Errno::EINTR)
        {
            sig_pending.dequeue();
        }

        res
    }
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn pause_returns_when_cond_holds() {
        let (waiter, _waker) = Waiter::new_pair();
        let sig_pending = SigPending::new();

        assert_eq!(waiter.pause_until(|| Some(7), &sig_pending), Ok(7));
    }

    #[test]
    fn pending_signal_interrupts_immediately() {
        let (waiter, _waker) = Waiter::new_pair();
        let sig_pending = SigPending::new();
        sig_pending.raise();

        let res: Result<()> = waiter.pause_until(|| None, &sig_pending);
        assert_eq!(res.unwrap_err().error(), Errno::EINTR);
        // The signal is consumed by the interrupted pause.
        assert!(!sig_pending.has_pending());
    }

    #[test]
    fn pause_times_out() {
        let (waiter, _waker) = Waiter::new_pair();
        let sig_pending = SigPending::new();

        let res: Result<()> = waiter.pause_until_or_timeout(
            || None,
            &sig_pending,
            Some(&Duration::from_millis(10)),
        );
        assert_eq!(res.unwrap_err().error(), Errno::ETIME);
    }

    #[test]
    fn signal_wakes_paused_thread() {
        let sig_pending = Arc::new(SigPending::new());
        let started = Arc::new(AtomicBool::new(false));

        let handle = {
            let sig_pending = sig_pending.clone();
            let started = started.clone();
            thread::spawn(move || {
                let (waiter, _waker) = Waiter::new_pair();
                started.store(true, Ordering::Release);
                let res: Result<()> = waiter.pause_until(|| None, &sig_pending);
                res
            })
        };

        while !started.load(Ordering::Acquire) {
            thread::yield_now();
        }
        sig_pending.raise();

        assert_eq!(handle.join().unwrap().unwrap_err().error(), Errno::EINTR);
    }
}
