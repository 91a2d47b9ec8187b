// SPDX-License-Identifier: MPL-2.0

//! Time sources used to stamp IPC objects.

pub mod clocks;

use crate::prelude::*;

/// A trait that can abstract clocks which have the ability to read time.
pub trait Clock: Send + Sync {
    /// Read the current time of this clock.
    fn read_time(&self) -> Duration;
}
