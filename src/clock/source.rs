//! Wall-time sources for the hybrid clock
//!
//! - `RealClockSource`: system time via `chrono`
//! - `FakeClockSource`: settable time for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock provider for a [`HybridClock`](super::HybridClock)
pub trait ClockSource: Send + Sync {
    /// Current wall time in nanoseconds since the Unix epoch
    fn now(&self) -> u64;

    /// Lowest wall time this source considers plausible
    fn min_valid(&self) -> u64;
}

/// Earliest timestamp accepted from the real clock (mid 2023)
const MIN_VALID_WALL_TIME: u64 = 0x176c_9a6f_d690_0000;

#[derive(Debug, Default, Clone, Copy)]
pub struct RealClockSource;

impl ClockSource for RealClockSource {
    fn now(&self) -> u64 {
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|ns| ns.max(0) as u64)
            .unwrap_or(u64::MAX >> 1)
    }

    fn min_valid(&self) -> u64 {
        MIN_VALID_WALL_TIME
    }
}

/// Deterministic source for tests: every reading advances by `step`.
#[derive(Debug)]
pub struct FakeClockSource {
    last: AtomicU64,
    start: u64,
    step: u64,
}

impl FakeClockSource {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
            start,
            step,
        }
    }
}

impl ClockSource for FakeClockSource {
    fn now(&self) -> u64 {
        self.last.fetch_add(self.step, Ordering::Relaxed) + self.step
    }

    fn min_valid(&self) -> u64 {
        self.start
    }
}
