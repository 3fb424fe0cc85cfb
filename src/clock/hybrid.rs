//! Hybrid logical clock
//!
//! - High bits follow wall time, the low 16 bits count events within a tick
//! - `now()` is strictly increasing, even if the wall clock steps back
//! - `see()` folds in a remote time; times past the allowed skew are rejected

use std::sync::atomic::{AtomicU64, Ordering};

use super::{ClockSource, LogicalTime, RealClockSource};
use crate::observability::{log_event, Event};

/// Highest timestamp that can ever be valid
const MAX_VALID_TIME: u64 = 0x7fff_ffff_ffff_ffff;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Hybrid logical clock.
///
/// `now()` never returns the same value twice and never goes backwards,
/// even if the wall clock does. `see()` folds in a timestamp received from
/// another peer so later local times sort after it.
pub struct HybridClock {
    source: Box<dyn ClockSource>,
    last_time: AtomicU64,
    min_valid: u64,
    max_skew: u64,
}

impl HybridClock {
    pub fn new(max_skew_secs: u64) -> Self {
        Self::with_source(Box::new(RealClockSource), max_skew_secs)
    }

    pub fn with_source(source: Box<dyn ClockSource>, max_skew_secs: u64) -> Self {
        let min_valid = source.min_valid();
        Self {
            source,
            last_time: AtomicU64::new(0),
            min_valid,
            max_skew: max_skew_secs.saturating_mul(NANOS_PER_SEC),
        }
    }

    /// Resume from a persisted `state()`
    pub fn restore(&self, state: LogicalTime) {
        self.last_time.fetch_max(state.as_u64(), Ordering::AcqRel);
    }

    /// Latest time issued or seen, for persisting
    pub fn state(&self) -> LogicalTime {
        LogicalTime::new(self.last_time.load(Ordering::Acquire))
    }

    fn update<F>(&self, f: F) -> LogicalTime
    where
        F: Fn(u64) -> Option<u64>,
    {
        let mut then = self.last_time.load(Ordering::Acquire);
        loop {
            let now = match f(then) {
                Some(now) => now,
                None => return LogicalTime::NONE,
            };
            match self
                .last_time
                .compare_exchange(then, now, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return LogicalTime::new(now),
                Err(actual) => then = actual,
            }
        }
    }

    /// A fresh local time, strictly greater than every time issued or seen so far
    pub fn now(&self) -> LogicalTime {
        self.update(|then| {
            let wall = self.source.now() & !0xFFFF;
            if wall <= (then & !0xFFFF) {
                Some(then + 1)
            } else {
                Some(wall)
            }
        })
    }

    /// Fold in a remote timestamp. Returns false (and leaves the clock alone)
    /// if the time is implausibly old or too far in the future.
    pub fn see(&self, seen: LogicalTime) -> bool {
        if !self.check_time(seen) {
            return false;
        }
        if seen.as_u64() <= self.last_time.load(Ordering::Acquire) {
            return true;
        }
        let seen_wall = seen.wall();
        let result = self.update(|then| {
            let local_wall = self.source.now();
            if seen_wall > local_wall.saturating_add(self.max_skew) {
                return None;
            }
            Some(then.max(seen.as_u64()))
        });
        if result.is_none() {
            log_event(
                Event::ClockTimeRejected,
                &[("time", &seen.to_string()), ("reason", "future")],
            );
            return false;
        }
        true
    }

    /// Whether `t` is within the plausible range
    pub fn valid_time(&self, t: LogicalTime) -> bool {
        t.as_u64() >= self.min_valid && t.as_u64() <= MAX_VALID_TIME
    }

    fn check_time(&self, t: LogicalTime) -> bool {
        if self.valid_time(t) {
            return true;
        }
        let reason = if t.as_u64() < self.min_valid { "past" } else { "invalid" };
        log_event(
            Event::ClockTimeRejected,
            &[("time", &t.to_string()), ("reason", reason)],
        );
        false
    }
}

impl std::fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClock")
            .field("last_time", &self.state())
            .field("min_valid", &self.min_valid)
            .finish()
    }
}
