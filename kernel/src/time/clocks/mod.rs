// SPDX-License-Identifier: MPL-2.0

pub use system_wide::RealTimeCoarseClock;

mod system_wide;
