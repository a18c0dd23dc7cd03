//! src/time.rs
//!
//! Simulated time. All durations and timestamps inside the core are
//! expressed in fractional seconds; YAML configuration fields that are
//! naturally specified in milliseconds (ping intervals, round times) are
//! converted once at load time via [`SimTime::from_millis`].

use std::ops::{Add, AddAssign, Sub};

/// A point (or duration) in simulated time, in seconds.
///
/// `f64` does not implement `Ord`, but IEEE-754 comparisons are a total
/// order once `NaN` is excluded; the scheduler never produces `NaN`
/// (delays are sums of non-negative bandwidth/latency terms), so
/// `f64::total_cmp` gives us a legitimate `Ord` for the event heap.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimTime(pub f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn from_millis(ms: f64) -> Self {
        SimTime(ms / 1000.0)
    }

    pub fn as_millis(self) -> f64 {
        self.0 * 1000.0
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Simulated second, floored — used for per-second load counters.
    pub fn floor_secs(self) -> i64 {
        self.0.floor() as i64
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0 - rhs.0)
    }
}

impl From<f64> for SimTime {
    fn from(secs: f64) -> Self {
        SimTime(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_numeric_value() {
        assert!(SimTime(1.0) < SimTime(2.0));
        assert_eq!(SimTime(1.0), SimTime(1.0));
    }

    #[test]
    fn millis_round_trip() {
        let t = SimTime::from_millis(7.0);
        assert!((t.as_secs() - 0.007).abs() < 1e-12);
    }
}
