use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock shared by the bus codec and every background worker.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - secs_since(): elapsed seconds from an epoch Instant, as recorded in motion frames
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Seconds elapsed since `epoch`, saturating at 0 on underflow.
    fn secs_since(&self, epoch: Instant) -> f64 {
        self.now().saturating_duration_since(epoch).as_secs_f64()
    }

    /// Sleep until `deadline`; returns immediately if it already passed.
    fn sleep_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(self.now());
        self.sleep(remaining);
    }
}

/// Real-time monotonic clock backed by std::time::Instant.
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

/// Deterministic clock whose time only moves when someone sleeps on it
/// or calls [`ManualClock::advance`].
///
/// now() = origin + offset
/// sleep(d) advances the shared offset by d and yields the thread.
/// Clones share the same timeline, so workers and tests observe one clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Total simulated time since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
        assert!((clock.secs_since(t0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn clones_share_one_timeline() {
        let a = ManualClock::new();
        let b = a.clone();
        b.advance(Duration::from_secs(2));
        assert_eq!(a.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn sleep_until_past_deadline_does_not_move_time() {
        let clock = ManualClock::new();
        let deadline = clock.now();
        clock.advance(Duration::from_millis(10));
        clock.sleep_until(deadline);
        assert_eq!(clock.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn monotonic_zero_sleep_returns() {
        let clock = MonotonicClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::ZERO);
        assert!(clock.now() >= t0);
    }
}
