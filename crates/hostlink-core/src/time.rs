//! Time primitives for hostlink
//!
//! Two notions of time are used:
//! - `WireTime`: wall clock, stamped on every message exchanged with the host PC
//! - `std::time::Instant`: monotonic, used for every scheduling decision

use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock timestamp carried on the wire
/// Represented as microseconds since the Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WireTime(pub i64);

impl WireTime {
    pub const EPOCH: WireTime = WireTime(0);

    /// Current wall-clock time
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => WireTime(since.as_micros() as i64),
            // Clock set before 1970
            Err(before) => WireTime(-(before.duration().as_micros() as i64)),
        }
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        WireTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        WireTime(millis * 1000)
    }

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        WireTime((secs * 1_000_000.0).round() as i64)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    /// Seconds since the epoch, the representation used in JSON records
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        WireTime(self.0.saturating_add(duration.as_micros() as i64))
    }
}

impl Add<Duration> for WireTime {
    type Output = WireTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        WireTime(self.0 + rhs.as_micros() as i64)
    }
}

impl Sub<WireTime> for WireTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: WireTime) -> Self::Output {
        let diff = self.0 - rhs.0;
        if diff >= 0 {
            Duration::from_micros(diff as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl std::fmt::Debug for WireTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wire({:.6}s)", self.as_secs_f64())
    }
}

/// Convert a duration to fractional milliseconds, the unit reported to the host PC
#[inline]
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_time_secs_roundtrip() {
        let time = WireTime::from_millis(1_700_000_000_123);
        let recovered = WireTime::from_secs_f64(time.as_secs_f64());

        // f64 keeps microsecond precision at this magnitude
        assert!((time.0 - recovered.0).abs() <= 1);
    }

    #[test]
    fn test_wire_time_now_is_after_2020() {
        let now = WireTime::now();
        assert!(now > WireTime::from_millis(1_577_836_800_000));
    }

    #[test]
    fn test_wire_time_difference_saturates() {
        let t1 = WireTime::from_millis(100);
        let t2 = t1 + Duration::from_millis(10);

        assert_eq!(t2 - t1, Duration::from_millis(10));
        assert_eq!(t1 - t2, Duration::ZERO);
    }

    #[test]
    fn test_millis_f64() {
        assert!((as_millis_f64(Duration::from_micros(1500)) - 1.5).abs() < 1e-9);
    }
}
