//! Time sources.
//!
//! Spans read two clocks: a wall clock for the timestamps that end up in exported
//! records, and a monotonic clock for measuring elapsed time. [`TimestampConverter`]
//! ties the two together so that events recorded later in a span's life get wall
//! timestamps computed from monotonic deltas (immune to NTP adjustments mid-span).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

/// Wall-clock instant, stored as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch. Used as the "no data collected" marker in view data.
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000_000)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    #[must_use]
    pub fn add_duration(self, duration: Duration) -> Self {
        self.add_nanos(duration.as_nanos() as u64)
    }

    #[must_use]
    pub fn sub_duration(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_nanos() as u64))
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// Source of wall and monotonic time.
///
/// Injected everywhere time is read so tests can drive it deterministically.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> Timestamp;

    /// Monotonic nanosecond reading. Only differences between readings are meaningful.
    fn now_nanos(&self) -> u64;
}

/// Clock backed by `SystemTime` and `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Timestamp(nanos)
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually driven clock for tests. Wall and monotonic time move together.
#[derive(Debug)]
pub struct TestClock {
    current: Mutex<Timestamp>,
}

impl TestClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock();
        *current = current.add_duration(duration);
    }

    /// Jumps to an absolute time (may go backwards).
    pub fn set(&self, timestamp: Timestamp) {
        *self.current.lock() = timestamp;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }

    fn now_nanos(&self) -> u64 {
        self.current.lock().as_nanos()
    }
}

/// Converts monotonic readings into wall timestamps relative to one anchor pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampConverter {
    timestamp: Timestamp,
    nanos: u64,
}

impl TimestampConverter {
    /// Anchors a converter at the clock's current readings.
    pub fn now(clock: &dyn Clock) -> Self {
        Self {
            timestamp: clock.now(),
            nanos: clock.now_nanos(),
        }
    }

    pub fn convert_nanos(&self, nanos: u64) -> Timestamp {
        if nanos >= self.nanos {
            self.timestamp.add_nanos(nanos - self.nanos)
        } else {
            Timestamp(self.timestamp.0.saturating_sub(self.nanos - nanos))
        }
    }
}
