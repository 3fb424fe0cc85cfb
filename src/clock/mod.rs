//! Hybrid logical clock
//!
//! This module provides:
//! - `LogicalTime`, the timestamp carried by every version
//! - `HybridClock`, which mints strictly increasing local times and folds in remote ones
//! - `ClockSource` with a real (wall clock) and a fake (deterministic) source

mod hybrid;
mod source;

pub use hybrid::HybridClock;
pub use source::{ClockSource, FakeClockSource, RealClockSource};

use std::fmt;

/// A hybrid logical timestamp: wall-clock nanoseconds in the high bits and a
/// 16-bit counter in the low bits. Zero means "no time".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalTime(u64);

impl LogicalTime {
    pub const NONE: LogicalTime = LogicalTime(0);

    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The next time, one counter tick later
    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub(crate) fn wall(&self) -> u64 {
        self.0 & !0xFFFF
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
