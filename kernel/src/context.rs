// SPDX-License-Identifier: MPL-2.0

//! The context that can be accessed from the current process.

use crate::process::Process;

/// The context that can be accessed from the current process.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub process: &'a Process,
}

impl<'a> Context<'a> {
    pub fn new(process: &'a Process) -> Self {
        Self { process }
    }
}
