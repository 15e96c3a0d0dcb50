// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock timestamps with microsecond resolution.
//!
//! [`TimeStamp`] is the canonical time representation on the wire. It is kept
//! normalized so that `0 <= microseconds < 1_000_000`; instants before the Unix
//! epoch carry a negative `seconds` and a positive `microseconds`.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Seconds and microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp {
    seconds: i64,
    microseconds: i32,
}

impl TimeStamp {
    /// The unset timestamp (`0.000000`).
    pub const ZERO: TimeStamp = TimeStamp {
        seconds: 0,
        microseconds: 0,
    };

    /// Build a timestamp, carrying excess or negative microseconds into seconds.
    #[must_use]
    pub fn new(seconds: i64, microseconds: i64) -> Self {
        let seconds = seconds.saturating_add(microseconds.div_euclid(MICROS_PER_SEC));
        let microseconds = microseconds.rem_euclid(MICROS_PER_SEC) as i32;
        Self {
            seconds,
            microseconds,
        }
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Total microseconds since the epoch.
    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        Self::new(0, micros)
    }

    #[must_use]
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    #[must_use]
    pub fn microseconds(&self) -> i32 {
        self.microseconds
    }

    /// True for [`TimeStamp::ZERO`].
    #[must_use]
    pub fn is_unset(&self) -> bool {
        *self == Self::ZERO
    }

    /// Total microseconds since the epoch (saturating).
    #[must_use]
    pub fn to_micros(&self) -> i64 {
        self.seconds
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(i64::from(self.microseconds))
    }

    /// Convert to a [`SystemTime`].
    #[must_use]
    pub fn to_system_time(&self) -> SystemTime {
        let micros = Duration::from_micros(u64::from(self.microseconds.unsigned_abs()));
        if self.seconds >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.seconds as u64) + micros
        } else {
            UNIX_EPOCH - Duration::from_secs(self.seconds.unsigned_abs()) + micros
        }
    }

    /// Seconds as a float. Lossy beyond roughly 2^53 microseconds.
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + f64::from(self.microseconds) / 1e6
    }

    /// Build from float seconds, rounding to the nearest microsecond.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_micros((secs * 1e6).round() as i64)
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn duration_since(&self, earlier: TimeStamp) -> Duration {
        let delta = self.to_micros().saturating_sub(earlier.to_micros());
        Duration::from_micros(delta.max(0) as u64)
    }
}

impl From<SystemTime> for TimeStamp {
    fn from(tp: SystemTime) -> Self {
        match tp.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, i64::from(d.subsec_micros())),
            Err(e) => {
                // Before the epoch: round towards the past at microsecond granularity.
                let d = e.duration();
                let micros = d.as_secs() as i64 * MICROS_PER_SEC
                    + i64::from(d.subsec_micros())
                    + i64::from(d.subsec_nanos() % 1_000 != 0);
                Self::from_micros(-micros)
            }
        }
    }
}

impl From<TimeStamp> for SystemTime {
    fn from(ts: TimeStamp) -> Self {
        ts.to_system_time()
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.seconds, self.microseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let ts = TimeStamp::new(1, 2_500_000);
        assert_eq!(ts.seconds(), 3);
        assert_eq!(ts.microseconds(), 500_000);

        let ts = TimeStamp::new(0, -1);
        assert_eq!(ts.seconds(), -1);
        assert_eq!(ts.microseconds(), 999_999);
    }

    #[test]
    fn test_system_time_round_trip() {
        let now = SystemTime::now();
        let ts = TimeStamp::from(now);
        let back = ts.to_system_time();
        let original = now.duration_since(UNIX_EPOCH).expect("after epoch");
        let restored = back.duration_since(UNIX_EPOCH).expect("after epoch");
        assert_eq!(original.as_micros(), restored.as_micros());
        assert_eq!(TimeStamp::from(back), ts);
    }

    #[test]
    fn test_round_trip_random_instants() {
        for _ in 0..1_000 {
            let micros = fastrand::i64(-4_000_000_000_000_000..4_000_000_000_000_000);
            let ts = TimeStamp::from_micros(micros);
            assert_eq!(ts.to_micros(), micros);
            assert_eq!(TimeStamp::from(ts.to_system_time()), ts);
        }
    }

    #[test]
    fn test_pre_epoch() {
        let tp = UNIX_EPOCH - Duration::from_micros(1_500_000);
        let ts = TimeStamp::from(tp);
        assert_eq!(ts.seconds(), -2);
        assert_eq!(ts.microseconds(), 500_000);
        assert_eq!(ts.to_system_time(), tp);
    }

    #[test]
    fn test_float_convenience_uses_micro_divisor() {
        let ts = TimeStamp::new(347_238, 438_274);
        assert!((ts.as_secs_f64() - 347_238.438_274).abs() < 1e-6);
        assert_eq!(TimeStamp::from_secs_f64(347_238.438_274), ts);
    }

    #[test]
    fn test_unset_and_duration() {
        assert!(TimeStamp::default().is_unset());
        let a = TimeStamp::new(10, 0);
        let b = TimeStamp::new(11, 250_000);
        assert_eq!(b.duration_since(a), Duration::from_micros(1_250_000));
        assert_eq!(a.duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeStamp::new(5, 42).to_string(), "5.000042");
    }
}
