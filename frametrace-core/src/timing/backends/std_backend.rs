//! Standard library clock backend
//!
//! Uses `std::time::Instant`, which is monotonic on every supported platform.

use std::time::Instant;

use crate::timing::Clock;

/// Monotonic clock measuring from its construction instant
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn name(&self) -> &'static str {
        "monotonic"
    }
}
