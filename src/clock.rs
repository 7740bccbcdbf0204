//! Time sources for the run lifecycle.
//!
//! Durations come from the monotonic side, report timestamps from the wall side.
//! Both are behind one trait so tests can drive time by hand.

use chrono::{DateTime, Duration as WallDuration, Utc};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic reading used for elapsed-time math
    fn monotonic(&self) -> Instant;

    /// Wall-clock reading used for timestamps in records and reports
    fn wall(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_wall: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall: start,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = WallDuration::from_std(self.offset()).unwrap_or_else(|_| WallDuration::zero());
        self.base_wall + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_both_sides_together() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let before = clock.monotonic();

        clock.advance(Duration::from_millis(250));

        assert_eq!(clock.monotonic().duration_since(before), Duration::from_millis(250));
        assert_eq!(clock.wall() - start, WallDuration::milliseconds(250));
    }
}
