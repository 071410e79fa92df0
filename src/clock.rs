//! Wall-clock source for cache keys and entry freshness
//!
//! The rate window runs on the monotonic tokio clock; everything tied to
//! calendar days (cache keys, entry timestamps, TTL checks) reads the time
//! through [`Clock`] so tests can move across days.

use std::fmt::Debug;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;

/// Source of the current UTC time
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The current calendar date (UTC)
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Reads the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward (or back, for a negative duration)
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
