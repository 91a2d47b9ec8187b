// SPDX-License-Identifier: MPL-2.0

pub mod credentials;
mod exit;
#[expect(clippy::module_inception)]
mod process;
pub mod signal;

pub use credentials::{Credentials, Gid, Uid};
pub use exit::do_exit;
pub use process::{Pid, Process};
