// SPDX-License-Identifier: MPL-2.0

use core::{fmt, str::FromStr};

use crate::{ipc::ids::IPCMNI, prelude::*};

// The following constant values are derived from the default values in Linux.

/// Maximum number of semaphore sets.
pub const SEMMNI: usize = 32000;
/// Maximum number of semaphores per semaphore ID.
pub const SEMMSL: usize = 32000;
/// Maximum number of semaphores in all semaphore sets.
pub const SEMMNS: usize = SEMMNI * SEMMSL;
/// Maximum number of operations for semop.
pub const SEMOPM: usize = 500;
/// Maximum semaphore value.
pub const SEMVMX: i32 = 32767;

/// The configurable limits of System V semaphores in one IPC namespace.
///
/// The limits parse from and format to the line of `/proc/sys/kernel/sem`, i.e.,
/// `"SEMMSL SEMMNS SEMOPM SEMMNI"`. The maximum semaphore value is not part of that line
/// and can only be lowered with [`SemLimits::with_semvmx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemLimits {
    semmsl: usize,
    semmns: usize,
    semopm: usize,
    semmni: usize,
    semvmx: i32,
}

impl SemLimits {
    /// Creates limits with the default maximum semaphore value.
    ///
    /// # Errors
    ///
    /// Returns `EINVAL` if any limit is zero or `semmni` exceeds the number of slots an
    /// identifier can encode.
    pub fn new(semmsl: usize, semmns: usize, semopm: usize, semmni: usize) -> Result<Self> {
        if semmsl == 0 || semmns == 0 || semopm == 0 || semmni == 0 {
            return_errno_with_message!(Errno::EINVAL, "semaphore limits must be positive");
        }
        if semmni > IPCMNI {
            return_errno_with_message!(Errno::EINVAL, "SEMMNI exceeds the identifier space");
        }

        Ok(Self {
            semmsl,
            semmns,
            semopm,
            semmni,
            semvmx: SEMVMX,
        })
    }

    /// Sets the maximum semaphore value, which cannot exceed [`SEMVMX`].
    pub fn with_semvmx(self, semvmx: i32) -> Result<Self> {
        if !(1..=SEMVMX).contains(&semvmx) {
            return_errno_with_message!(Errno::EINVAL, "SEMVMX is out of range");
        }
        Ok(Self { semvmx, ..self })
    }

    /// Maximum number of semaphores per set.
    pub fn semmsl(&self) -> usize {
        self.semmsl
    }

    /// Maximum number of semaphores in all sets.
    pub fn semmns(&self) -> usize {
        self.semmns
    }

    /// Maximum number of operations per `semop` call.
    pub fn semopm(&self) -> usize {
        self.semopm
    }

    /// Maximum number of sets.
    pub fn semmni(&self) -> usize {
        self.semmni
    }

    /// Maximum semaphore value.
    pub fn semvmx(&self) -> i32 {
        self.semvmx
    }

    /// Maximum value that can be recorded for semaphore adjustment (SEM_UNDO).
    pub fn semaem(&self) -> i32 {
        self.semvmx
    }
}

impl Default for SemLimits {
    fn default() -> Self {
        Self {
            semmsl: SEMMSL,
            semmns: SEMMNS,
            semopm: SEMOPM,
            semmni: SEMMNI,
            semvmx: SEMVMX,
        }
    }
}

impl FromStr for SemLimits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut values = [0usize; 4];
        let mut fields = s.split_whitespace();
        for value in values.iter_mut() {
            let field = fields.next().ok_or(Error::with_message(
                Errno::EINVAL,
                "too few semaphore limits",
            ))?;
            *value = field.parse().map_err(|_| {
                Error::with_message(Errno::EINVAL, "a semaphore limit is not a number")
            })?;
        }
        if fields.next().is_some() {
            return_errno_with_message!(Errno::EINVAL, "too many semaphore limits");
        }

        let [semmsl, semmns, semopm, semmni] = values;
        Self::new(semmsl, semmns, semopm, semmni)
    }
}

impl fmt::Display for SemLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.semmsl, self.semmns, self.semopm, self.semmni
        )
    }
}
