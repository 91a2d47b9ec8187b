// SPDX-License-Identifier: MPL-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use crate::prelude::*;

/// `RealTimeCoarseClock` is a coarse-grained version of a real-time clock.
///
/// Readings are truncated to whole seconds, which is the granularity that the
/// `sem_otime` and `sem_ctime` fields expose.
pub struct RealTimeCoarseClock {
    _private: (),
}

static CLOCK_REALTIME_COARSE_INSTANCE: RealTimeCoarseClock = RealTimeCoarseClock { _private: () };

impl RealTimeCoarseClock {
    /// Get the singleton of this clock.
    pub fn get() -> &'static RealTimeCoarseClock {
        &CLOCK_REALTIME_COARSE_INSTANCE
    }
}

impl Clock for RealTimeCoarseClock {
    fn read_time(&self) -> Duration {
        // A host clock set before the epoch reads as the epoch itself.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Duration::from_secs(now.as_secs())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coarse_clock_has_whole_seconds() {
        let now = RealTimeCoarseClock::get().read_time();
        assert_eq!(now.subsec_nanos(), 0);
        assert!(now.as_secs() > 0);
    }
}
