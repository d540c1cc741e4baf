use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{DanceCueError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metronome: MetronomeConfig,
    pub click: ClickConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.metronome.validate()?;
        self.click.validate()?;
        self.audio.validate()
    }
}

/// Beat clock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    /// BPM in effect before the user touches anything. `None` means the
    /// metronome refuses to start until a BPM is set or tapped.
    pub initial_bpm: Option<f64>,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Length of the beat cycle. Salsa counts in eights.
    pub beats_per_measure: u32,
    /// Taps older than this are forgotten when a new tap arrives.
    pub tap_window_ms: u64,
    /// Increment used by the host's `+`/`-` controls.
    pub bpm_step: f64,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            initial_bpm: Some(120.0),
            min_bpm: 40.0,
            max_bpm: 300.0,
            beats_per_measure: 8,
            tap_window_ms: 2_000,
            bpm_step: 1.0,
        }
    }
}

impl MetronomeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_bpm.is_finite() && self.max_bpm.is_finite()) || self.min_bpm <= 0.0 {
            return Err(DanceCueError::InvalidConfig(format!(
                "bpm bounds must be finite and positive, got [{}, {}]",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.min_bpm > self.max_bpm {
            return Err(DanceCueError::InvalidConfig(format!(
                "min_bpm {} exceeds max_bpm {}",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.beats_per_measure == 0 {
            return Err(DanceCueError::InvalidConfig(
                "beats_per_measure must be at least 1".to_string(),
            ));
        }
        if self.tap_window_ms == 0 {
            return Err(DanceCueError::InvalidConfig(
                "tap_window_ms must be positive".to_string(),
            ));
        }
        if let Some(bpm) = self.initial_bpm {
            if !bpm.is_finite() || bpm <= 0.0 {
                return Err(DanceCueError::InvalidConfig(format!(
                    "initial_bpm must be positive, got {bpm}"
                )));
            }
        }
        Ok(())
    }
}

/// Longest attack or decay a click may be configured with.
pub const MAX_ENVELOPE_MS: f32 = 10_000.0;

/// Amplitude envelope of one click flavour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    pub peak_gain: f32,
    pub decay_ms: f32,
}

/// Tone and envelopes of the metronome click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub frequency_hz: f32,
    pub attack_ms: f32,
    /// Gain the exponential decay reaches at the end of the envelope.
    pub floor_gain: f32,
    pub downbeat: EnvelopeConfig,
    pub regular: EnvelopeConfig,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 800.0,
            attack_ms: 1.0,
            floor_gain: 0.001,
            downbeat: EnvelopeConfig {
                peak_gain: 0.7,
                decay_ms: 200.0,
            },
            regular: EnvelopeConfig {
                peak_gain: 0.5,
                decay_ms: 100.0,
            },
        }
    }
}

impl ClickConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency_hz > 0.0 && self.frequency_hz.is_finite()) {
            return Err(DanceCueError::InvalidConfig(
                "click frequency must be positive".to_string(),
            ));
        }
        if !(0.0..=MAX_ENVELOPE_MS).contains(&self.attack_ms) {
            return Err(DanceCueError::InvalidConfig(format!(
                "click attack must lie within [0, {MAX_ENVELOPE_MS}] ms"
            )));
        }
        for envelope in [&self.downbeat, &self.regular] {
            if !(envelope.peak_gain > self.floor_gain
                && envelope.decay_ms > 0.0
                && envelope.decay_ms <= MAX_ENVELOPE_MS)
            {
                return Err(DanceCueError::InvalidConfig(format!(
                    "click envelope {envelope:?} must rise above floor gain {} and decay over a positive time",
                    self.floor_gain
                )));
            }
        }
        if self.floor_gain <= 0.0 {
            return Err(DanceCueError::InvalidConfig(
                "floor_gain must be positive for an exponential decay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.block_size == 0 {
            return Err(DanceCueError::InvalidConfig(
                "sample_rate and block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "metronome": { "beats_per_measure": 4 } }"#).unwrap();

        assert_eq!(config.metronome.beats_per_measure, 4);
        assert_eq!(config.metronome.initial_bpm, Some(120.0));
        assert_eq!(config.click, ClickConfig::default());
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn null_initial_bpm_is_allowed() {
        let config = AppConfig::from_json_str(r#"{ "metronome": { "initial_bpm": null } }"#)
            .unwrap();
        assert_eq!(config.metronome.initial_bpm, None);
    }

    #[test]
    fn rejects_inverted_bpm_bounds() {
        let err =
            AppConfig::from_json_str(r#"{ "metronome": { "min_bpm": 200, "max_bpm": 100 } }"#)
                .unwrap_err();
        assert!(matches!(err, DanceCueError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_measure() {
        let config = MetronomeConfig {
            beats_per_measure: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_click_envelopes() {
        let mut click = ClickConfig::default();
        click.downbeat.decay_ms = 1.0e9;
        assert!(click.validate().is_err());

        let click = ClickConfig {
            attack_ms: f32::INFINITY,
            ..Default::default()
        };
        assert!(click.validate().is_err());

        let mut click = ClickConfig::default();
        click.regular.decay_ms = MAX_ENVELOPE_MS;
        assert!(click.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, DanceCueError::Json(_)));
    }
}
