//! Time source for lease polling
//!
//! The lock never calls `SystemTime::now` or `thread::sleep` directly so
//! that polling can be driven by virtual time in tests and simulations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Wall clock and sleep primitive used by [`LeaseLock`](super::LeaseLock)
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time, comparable with filesystem timestamps
    fn now(&self) -> SystemTime;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// The real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock instantly instead of blocking, so an
/// acquisition loop with a one-minute window finishes in microseconds.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
    sleeps: AtomicU64,
}

impl ManualClock {
    /// Start at the current system time
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Start at a given instant
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: AtomicU64::new(0),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Number of times `sleep` has been called
    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::Relaxed)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::Relaxed);
        self.advance(duration);
        // Give racing threads a chance to run between virtual polls
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let start = SystemTime::now();
        let clock = ManualClock::starting_at(start);

        clock.sleep(Duration::from_secs(1));
        clock.sleep(Duration::from_secs(1));

        assert_eq!(clock.now(), start + Duration::from_secs(2));
        assert_eq!(clock.sleeps(), 2);
    }

    #[test]
    fn test_manual_clock_advance() {
        let start = SystemTime::now();
        let clock = ManualClock::starting_at(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(90));
        assert_eq!(clock.sleeps(), 0);
    }
}
