//! Mock clock for testing
//!
//! Time only moves when a test says so.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::timing::Clock;

/// Manually advanced clock
///
/// Useful for asserting exact timestamps and sampling-rate behavior
/// without sleeping.
#[derive(Debug, Default)]
pub struct MockClock {
    now_ns: AtomicU64,
}

impl MockClock {
    /// Create a clock at t = 0
    pub fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Jump to an absolute time (must not move backwards)
    pub fn set_ns(&self, now_ns: u64) {
        self.now_ns.fetch_max(now_ns, Ordering::AcqRel);
    }
}

impl Clock for MockClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
