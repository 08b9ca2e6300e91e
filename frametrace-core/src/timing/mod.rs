//! # Frame timing
//!
//! Monotonic time measurement relative to the last frame boundary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 FrameTimer                   │
//! │  • timestamp_ns(): offset since last flip    │
//! │  • flip_ms(): duration of finished interval  │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                 Clock (trait)                │
//! ├──────────────────────┬───────────────────────┤
//! │ MonotonicClock       │ MockClock             │
//! │ (std::time::Instant) │ (manually advanced)   │
//! └──────────────────────┴───────────────────────┘
//! ```
//!
//! Clocks are monotonic by contract: wall-clock adjustments must never make
//! a timestamp jump backwards.

pub mod backends;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use backends::{MockClock, MonotonicClock};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Nanoseconds elapsed since an arbitrary, fixed origin
    fn now_ns(&self) -> u64;

    /// Clock name (for logging)
    fn name(&self) -> &'static str;
}

/// Measures elapsed time since the last frame boundary
///
/// `timestamp_ns` may be called from any number of threads while a single
/// control thread calls `flip_*` or `reset`; the reference point is a single
/// atomic so readers never observe a torn value.
pub struct FrameTimer {
    clock: Arc<dyn Clock>,
    last_flip_ns: AtomicU64,
}

impl FrameTimer {
    /// Create a timer whose reference point is "now"
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ns();
        Self {
            clock,
            last_flip_ns: AtomicU64::new(now),
        }
    }

    /// Offset since the last flip or reset in nanoseconds
    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        let last = self.last_flip_ns.load(Ordering::Acquire);
        self.clock.now_ns().saturating_sub(last)
    }

    /// Flip the frame, returning the finished interval in nanoseconds
    pub fn flip_ns(&self) -> u64 {
        let now = self.clock.now_ns();
        let last = self.last_flip_ns.swap(now, Ordering::AcqRel);
        now.saturating_sub(last)
    }

    /// Flip the frame, returning the finished interval in whole milliseconds
    pub fn flip_ms(&self) -> u32 {
        let millis = self.flip_ns() / NANOS_PER_MILLI;
        u32::try_from(millis).unwrap_or(u32::MAX)
    }

    /// Move the reference point to now
    pub fn reset(&self) {
        self.last_flip_ns
            .store(self.clock.now_ns(), Ordering::Release);
    }

    /// The underlying clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for FrameTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTimer")
            .field("clock", &self.clock.name())
            .field("last_flip_ns", &self.last_flip_ns.load(Ordering::Relaxed))
            .finish()
    }
}
