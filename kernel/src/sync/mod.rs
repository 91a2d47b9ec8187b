// SPDX-License-Identifier: MPL-2.0

//! Useful synchronization primitives.

mod wait;

pub use self::wait::{Waiter, Waker};
