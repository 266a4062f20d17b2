//! Time source for the guardian loop and quarantine naming.
//!
//! Production code uses [`SystemClock`]; tests drive [`ManualClock`] so cycle
//! scheduling and quarantine timestamps are deterministic.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Granularity at which [`SystemClock::sleep`] re-checks its wake condition.
const WAKE_POLL: Duration = Duration::from_millis(100);

pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> DateTime<Local>;

    /// Sleep for up to `duration`, returning early once `wake()` is true.
    ///
    /// Returns `true` when woken early.
    fn sleep(&self, duration: Duration, wake: &dyn Fn() -> bool) -> bool;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration, wake: &dyn Fn() -> bool) -> bool {
        // A deadline past the end of `Instant` means "until woken".
        let deadline = Instant::now().checked_add(duration);
        loop {
            if wake() {
                return true;
            }
            let now = Instant::now();
            let step = match deadline {
                Some(deadline) if now >= deadline => return false,
                Some(deadline) => WAKE_POLL.min(deadline - now),
                None => WAKE_POLL,
            };
            thread::sleep(step);
        }
    }
}

/// Deterministic clock: `sleep` advances time instantly and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(now: DateTime<Local>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// Durations passed to `sleep`, in call order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration, wake: &dyn Fn() -> bool) -> bool {
        self.sleeps.lock().push(duration);
        if wake() {
            return true;
        }
        self.advance(duration);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fixed() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::starting_at(fixed());
        assert!(!clock.sleep(Duration::from_secs(30), &|| false));
        assert_eq!(clock.now(), fixed() + chrono::Duration::seconds(30));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn manual_clock_wakes_without_advancing() {
        let clock = ManualClock::starting_at(fixed());
        assert!(clock.sleep(Duration::from_secs(30), &|| true));
        assert_eq!(clock.now(), fixed());
    }

    #[test]
    fn system_clock_wakes_early() {
        let flag = AtomicBool::new(false);
        let start = Instant::now();
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(150));
                flag.store(true, Ordering::Relaxed);
            });
            let woke = SystemClock.sleep(Duration::from_secs(30), &|| {
                flag.load(Ordering::Relaxed)
            });
            assert!(woke);
        });
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn system_clock_unrepresentable_deadline_does_not_panic() {
        assert!(SystemClock.sleep(Duration::from_secs(u64::MAX), &|| true));

        let polls = AtomicUsize::new(0);
        let woke = SystemClock.sleep(Duration::MAX, &|| {
            polls.fetch_add(1, Ordering::Relaxed) >= 2
        });
        assert!(woke);
        assert_eq!(polls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn system_clock_sleeps_full_duration_when_idle() {
        let start = Instant::now();
        assert!(!SystemClock.sleep(Duration::from_millis(120), &|| false));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
