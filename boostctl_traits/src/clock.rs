use std::thread;
use std::time::{Duration, Instant};

/// Time source for everything in the controller that waits or measures
/// elapsed time: calibration homing, the scheduler gates, the comms and
/// overboost fault timers.
///
/// Nothing downstream calls `Instant::now()` or `thread::sleep` directly.
/// Going through this trait lets tests substitute a simulated clock and run
/// seconds of loop time in microseconds, deterministically.
pub trait Clock {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Wait for `d` (a simulated clock may just advance instead).
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis() as u64
    }
}

/// Production clock: `Instant::now()` and a real `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Simulated clock for timer-sensitive tests. Lives outside `#[cfg(test)]`
/// so the integration tests of downstream crates can use it too.
pub mod test_clock {
    use super::*;

    /// Clock that only moves when told to. `now()` reports a fixed origin
    /// plus an accumulated offset, and `sleep` adds the requested duration
    /// to that offset without blocking, so code written against [`Clock`]
    /// experiences time passing at whatever rate the test dictates.
    ///
    /// Clones share the offset, letting a test hold a handle to the same
    /// timeline the code under test is sleeping on.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        offset: std::sync::Arc<std::sync::Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: std::sync::Arc::new(std::sync::Mutex::new(Duration::ZERO)),
            }
        }

        /// Move the timeline forward by `d`.
        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        /// Jump the timeline to `d` past the origin.
        pub fn set_offset(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = d;
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
