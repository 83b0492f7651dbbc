//! Common time/period helpers for servohand_core.

use std::time::Duration;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Compute the period in microseconds for a given sampling rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Sampling period for `hz` as a `Duration`.
#[inline]
pub fn period(hz: u32) -> Duration {
    Duration::from_micros(period_us(hz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_of_common_rates() {
        assert_eq!(period_us(10), 100_000);
        assert_eq!(period_us(20), 50_000);
        assert_eq!(period(0), Duration::from_secs(1));
        assert_eq!(period_us(u32::MAX), 1);
    }
}
