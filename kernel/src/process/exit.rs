// SPDX-License-Identifier: MPL-2.0

use super::Process;
use crate::prelude::*;

/// Exits the process.
///
/// The semaphore adjustments recorded with `SEM_UNDO` are applied before the process
/// disappears from its IPC namespace. Calling this more than once is a no-op.
pub fn do_exit(current_process: &Process) {
    if current_process.set_exited() {
        return;
    }

    debug!("[do_exit] pid = {}", current_process.pid());

    current_process
        .ipc_ns()
        .on_process_exit(current_process.pid());
}
