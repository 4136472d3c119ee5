//! Time source for bitemporal stamps
//!
//! All stamps are epoch milliseconds. The open-ended upper bound of a window
//! is the [`MAX_DATE`] sentinel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds per day, used for age computations
pub const MS_PER_DAY: i64 = 86_400_000;

/// Epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

/// 9999-12-31T23:59:59.999Z, marks a window that is still open
pub const MAX_DATE: Timestamp = Timestamp(253_402_300_799_999);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn is_open(self) -> bool {
        self == MAX_DATE
    }

    /// Shift by a number of whole days (negative moves backwards)
    pub fn plus_days(self, days: i64) -> Self {
        Self(self.0.saturating_add(days.saturating_mul(MS_PER_DAY)))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            return write!(f, "open");
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Source of "now" for the versioning protocol
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock that never hands out the same millisecond twice
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp(next),
                Err(observed) => prev = observed,
            }
        }
    }
}

/// Manually driven clock for tests and replays.
///
/// Each reading advances by `step` milliseconds so stamps stay strictly
/// increasing.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<i64>,
    step: i64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start.0),
            step: 1,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Jump forward without producing a reading
    pub fn advance(&self, ms: i64) {
        *self.current.lock() += ms;
    }

    /// Last value handed out (or the start value)
    pub fn peek(&self) -> Timestamp {
        Timestamp(*self.current.lock())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock();
        *current += self.step;
        Timestamp(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_date_is_year_9999() {
        let dt = MAX_DATE.to_datetime().unwrap();
        assert_eq!(dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true), "9999-12-31T23:59:59.999Z");
        assert!(MAX_DATE.is_open());
        assert_eq!(MAX_DATE.to_string(), "open");
    }

    #[test]
    fn test_system_clock_strictly_increasing() {
        let clock = SystemClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp(1_000)).with_step(5);
        assert_eq!(clock.now(), Timestamp(1_005));
        clock.advance(100);
        assert_eq!(clock.now(), Timestamp(1_110));
        assert_eq!(clock.peek(), Timestamp(1_110));
    }

    #[test]
    fn test_plus_days() {
        let t = Timestamp(0).plus_days(2);
        assert_eq!(t.as_millis(), 2 * MS_PER_DAY);
        assert_eq!(t.plus_days(-2), Timestamp(0));
    }
}
