use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{config::MetronomeConfig, DanceCueError, Result};

/// A validated tempo, finite and strictly positive, kept to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bpm(f64);

impl Bpm {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(DanceCueError::InvalidBpm(value));
        }
        let rounded = round_hundredths(value);
        if rounded <= 0.0 {
            return Err(DanceCueError::InvalidBpm(value));
        }
        Ok(Self(rounded))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Time between two beats.
    pub fn period(self) -> Duration {
        Duration::from_secs_f64(60.0 / self.0)
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Inclusive bounds every accepted BPM is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmRange {
    pub min: f64,
    pub max: f64,
}

impl BpmRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min > max {
            return Err(DanceCueError::InvalidConfig(format!(
                "invalid bpm range [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn from_config(config: &MetronomeConfig) -> Result<Self> {
        Self::new(config.min_bpm, config.max_bpm)
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Rejects values that are not a tempo at all, clamps everything else.
    pub fn validate(&self, raw: f64) -> Result<Bpm> {
        if !raw.is_finite() || raw <= 0.0 {
            return Err(DanceCueError::InvalidBpm(raw));
        }
        Bpm::new(raw.clamp(self.min, self.max))
    }
}

impl Default for BpmRange {
    fn default() -> Self {
        let config = MetronomeConfig::default();
        Self {
            min: config.min_bpm,
            max: config.max_bpm,
        }
    }
}

/// Estimates tempo from the spacing of user taps.
///
/// A tap is kept while it is strictly younger than the window relative to
/// the newest tap.
#[derive(Debug, Clone)]
pub struct TapTempo {
    window: Duration,
    taps: VecDeque<Duration>,
}

impl TapTempo {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            taps: VecDeque::new(),
        }
    }

    pub fn from_config(config: &MetronomeConfig) -> Self {
        Self::new(Duration::from_millis(config.tap_window_ms))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }

    /// Records a tap at `now` and returns the raw BPM estimate once at least
    /// two taps share the window. The estimate is not clamped.
    pub fn tap(&mut self, now: Duration) -> Option<f64> {
        // A clock that went backwards invalidates the history.
        if self.taps.back().is_some_and(|last| *last > now) {
            self.taps.clear();
        }
        while self
            .taps
            .front()
            .is_some_and(|oldest| now - *oldest >= self.window)
        {
            self.taps.pop_front();
        }
        self.taps.push_back(now);

        self.estimate()
    }

    fn estimate(&self) -> Option<f64> {
        if self.taps.len() < 2 {
            return None;
        }

        let mut sum_ms = 0.0;
        let mut count = 0_u32;
        for (earlier, later) in self.taps.iter().zip(self.taps.iter().skip(1)) {
            sum_ms += (*later - *earlier).as_secs_f64() * 1_000.0;
            count += 1;
        }

        let mean_ms = sum_ms / f64::from(count);
        if mean_ms <= f64::EPSILON {
            return None;
        }
        Some(60_000.0 / mean_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn bpm_rejects_non_tempos() {
        for raw in [0.0, -5.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(Bpm::new(raw).is_err(), "{raw} should be rejected");
            assert!(BpmRange::default().validate(raw).is_err());
        }
    }

    #[test]
    fn bpm_keeps_two_decimals() {
        assert_eq!(Bpm::new(120.456).unwrap().value(), 120.46);
        assert_eq!(Bpm::new(98.5).unwrap().to_string(), "98.50");
    }

    #[test]
    fn period_matches_tempo() {
        assert_eq!(Bpm::new(120.0).unwrap().period(), ms(500));
        assert_eq!(Bpm::new(60.0).unwrap().period(), ms(1_000));
    }

    #[test]
    fn range_clamps_valid_values() {
        let range = BpmRange::default();
        assert_eq!(range.validate(20.0).unwrap().value(), 40.0);
        assert_eq!(range.validate(1_000.0).unwrap().value(), 300.0);
        assert_eq!(range.validate(132.0).unwrap().value(), 132.0);
        assert_eq!(range.validate(0.004).unwrap().value(), 40.0);
        assert!(range.validate(f64::NAN).is_err());
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(BpmRange::new(200.0, 100.0).is_err());
        assert!(BpmRange::new(0.0, 100.0).is_err());
    }

    #[test]
    fn evenly_spaced_taps_give_their_tempo() {
        let mut taps = TapTempo::new(ms(2_000));
        assert_eq!(taps.tap(ms(10_000)), None);
        let first = taps.tap(ms(10_500)).unwrap();
        let second = taps.tap(ms(11_000)).unwrap();

        assert!((first - 120.0).abs() < 1e-9);
        assert!((second - 120.0).abs() < 1e-9);
        assert_eq!(taps.len(), 3);
    }

    #[test]
    fn mean_interval_averages_uneven_taps() {
        let mut taps = TapTempo::new(ms(2_000));
        taps.tap(ms(0));
        taps.tap(ms(400));
        let bpm = taps.tap(ms(1_000)).unwrap();
        assert!((bpm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn taps_outside_the_window_are_dropped() {
        let mut taps = TapTempo::new(ms(2_000));
        taps.tap(ms(0));
        taps.tap(ms(500));

        // Exactly one window after the last tap: everything before expires.
        assert_eq!(taps.tap(ms(2_500)), None);
        assert_eq!(taps.len(), 1);
    }

    #[test]
    fn simultaneous_taps_give_no_estimate() {
        let mut taps = TapTempo::new(ms(2_000));
        taps.tap(ms(100));
        assert_eq!(taps.tap(ms(100)), None);
    }

    #[test]
    fn backwards_clock_restarts_the_window() {
        let mut taps = TapTempo::new(ms(2_000));
        taps.tap(ms(5_000));
        assert_eq!(taps.tap(ms(1_000)), None);
        assert_eq!(taps.len(), 1);
    }
}
