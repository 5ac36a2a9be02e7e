//! Clock & Timebase — the single source of "now" every other component
//! reads, writes, or schedules against. No component outside this module
//! calls `Utc::now()` directly; that seam is what lets tests substitute a
//! fixed or steppable clock instead of racing the wall clock.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: the OS wall clock, in UTC. Callers apply the
/// configured `TIMEZONE` themselves when doing cron/interval math — the
/// instant itself is zone-independent.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock: holds a mutable instant, advanced explicitly by the test.
/// Never advances on its own — no sleeping, no wall-clock reads.
#[derive(Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().unwrap() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard = *guard + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_holds_instant() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn fixed_clock_advances_explicitly() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), t + chrono::Duration::seconds(30));
    }

    #[test]
    fn system_clock_is_close_to_wall_clock() {
        let clock = SystemClock;
        let delta = (Utc::now() - clock.now()).num_milliseconds().abs();
        assert!(delta < 1000);
    }
}
