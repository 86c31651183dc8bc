use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{KaraokeError, Result};

/// Smallest analysis window the estimator accepts.
pub const MIN_WINDOW_SIZE: usize = 64;

/// Top-level configuration structure for a karaoke session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub pitch: PitchConfig,
    pub scoring: ScoringConfig,
    pub star_power: StarPowerConfig,
}

impl EngineConfig {
    /// Parses a JSON document. Missing sections and fields fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks every section, failing on the first inconsistent value.
    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.pitch.validate()?;
        self.scoring.validate()?;
        self.star_power.validate()
    }
}

/// Shape of the audio delivered by the capture path and the update cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub window_size: usize,
    pub tick_rate_hz: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            window_size: 2048,
            tick_rate_hz: 60,
        }
    }
}

impl CaptureConfig {
    /// Milliseconds between two update-loop ticks.
    pub fn tick_interval_ms(&self) -> u64 {
        (1000 / self.tick_rate_hz.max(1)).max(1) as u64
    }

    /// Duration covered by one capture window, in milliseconds.
    pub fn window_duration_ms(&self) -> f64 {
        self.window_size as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(KaraokeError::config("capture.sample_rate must be positive"));
        }
        if self.window_size < MIN_WINDOW_SIZE {
            return Err(KaraokeError::config(format!(
                "capture.window_size must be at least {MIN_WINDOW_SIZE}"
            )));
        }
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            return Err(KaraokeError::config(
                "capture.tick_rate_hz must be between 1 and 1000",
            ));
        }
        Ok(())
    }
}

/// Tunables of the YIN estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Windows with an RMS below this level are reported as silent.
    pub silence_rms: f64,
    /// Absolute threshold on the cumulative-mean-normalised difference.
    pub yin_threshold: f64,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    /// Gain applied to the RMS before it is clamped into a loudness value.
    pub loudness_gain: f64,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            silence_rms: 0.01,
            yin_threshold: 0.12,
            min_frequency_hz: 60.0,
            max_frequency_hz: 1200.0,
            loudness_gain: 10.0,
        }
    }
}

impl PitchConfig {
    fn validate(&self) -> Result<()> {
        if !(self.silence_rms >= 0.0 && self.silence_rms < 1.0) {
            return Err(KaraokeError::config("pitch.silence_rms must be in [0, 1)"));
        }
        if !(self.yin_threshold > 0.0 && self.yin_threshold < 1.0) {
            return Err(KaraokeError::config("pitch.yin_threshold must be in (0, 1)"));
        }
        if !(self.min_frequency_hz > 0.0 && self.min_frequency_hz < self.max_frequency_hz) {
            return Err(KaraokeError::config(
                "pitch frequency band must satisfy 0 < min_frequency_hz < max_frequency_hz",
            ));
        }
        if !(self.loudness_gain > 0.0 && self.loudness_gain.is_finite()) {
            return Err(KaraokeError::config("pitch.loudness_gain must be positive"));
        }
        Ok(())
    }
}

/// Point values and gates used by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ticks whose loudness is below this gate are not evaluated.
    pub silence_loudness: f64,
    pub combo_bonus_unit: f64,
    /// Flat bonus for a successful golden note.
    pub golden_bonus: f64,
    /// Applied to the running total of a successful bonus note.
    pub bonus_note_multiplier: f64,
    pub perfect_points: f64,
    pub good_points: f64,
    pub okay_points: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            silence_loudness: 0.1,
            combo_bonus_unit: 10.0,
            golden_bonus: 50.0,
            bonus_note_multiplier: 1.5,
            perfect_points: 100.0,
            good_points: 75.0,
            okay_points: 50.0,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.silence_loudness) {
            return Err(KaraokeError::config("scoring.silence_loudness must be in [0, 1)"));
        }
        let values = [
            ("combo_bonus_unit", self.combo_bonus_unit),
            ("golden_bonus", self.golden_bonus),
            ("perfect_points", self.perfect_points),
            ("good_points", self.good_points),
            ("okay_points", self.okay_points),
        ];
        for (name, value) in values {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(KaraokeError::config(format!(
                    "scoring.{name} must be a non-negative number"
                )));
            }
        }
        if !(self.perfect_points >= self.good_points && self.good_points >= self.okay_points) {
            return Err(KaraokeError::config(
                "scoring points must satisfy perfect >= good >= okay",
            ));
        }
        if !(self.bonus_note_multiplier >= 1.0 && self.bonus_note_multiplier.is_finite()) {
            return Err(KaraokeError::config(
                "scoring.bonus_note_multiplier must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Charge, drain and reward settings of the star-power meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarPowerConfig {
    pub activation_threshold: f64,
    pub active_duration_ms: u64,
    pub score_multiplier: f64,
    pub perfect_charge: f64,
    pub good_charge: f64,
    pub okay_charge: f64,
    pub golden_charge: f64,
    /// Extra charge fraction per combo step.
    pub combo_charge_step: f64,
    /// Combo beyond this value no longer increases the charge.
    pub combo_charge_cap: u32,
}

impl Default for StarPowerConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 50.0,
            active_duration_ms: 8_000,
            score_multiplier: 2.0,
            perfect_charge: 4.0,
            good_charge: 2.5,
            okay_charge: 1.0,
            golden_charge: 10.0,
            combo_charge_step: 0.02,
            combo_charge_cap: 50,
        }
    }
}

impl StarPowerConfig {
    fn validate(&self) -> Result<()> {
        if !(self.activation_threshold > 0.0 && self.activation_threshold <= 100.0) {
            return Err(KaraokeError::config(
                "star_power.activation_threshold must be in (0, 100]",
            ));
        }
        if self.active_duration_ms == 0 {
            return Err(KaraokeError::config(
                "star_power.active_duration_ms must be positive",
            ));
        }
        if !(self.score_multiplier >= 1.0 && self.score_multiplier.is_finite()) {
            return Err(KaraokeError::config(
                "star_power.score_multiplier must be at least 1",
            ));
        }
        let charges = [
            self.perfect_charge,
            self.good_charge,
            self.okay_charge,
            self.golden_charge,
            self.combo_charge_step,
        ];
        if charges.iter().any(|c| !(*c >= 0.0 && c.is_finite())) {
            return Err(KaraokeError::config(
                "star_power charges must be non-negative numbers",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "capture": { "sample_rate": 44100 } }"#).unwrap();

        assert_eq!(config.capture.sample_rate, 44_100);
        assert_eq!(config.capture.window_size, 2048);
        assert_eq!(config.pitch, PitchConfig::default());
    }

    #[test]
    fn rejects_inverted_frequency_band() {
        let json = r#"{ "pitch": { "min_frequency_hz": 900.0, "max_frequency_hz": 100.0 } }"#;
        let err = EngineConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, KaraokeError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_tiny_windows() {
        let mut config = EngineConfig::default();
        config.capture.window_size = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_star_power_duration() {
        let mut config = EngineConfig::default();
        config.star_power.active_duration_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("active_duration_ms"));
    }

    #[test]
    fn reports_malformed_json() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, KaraokeError::Json(_)));
    }

    #[test]
    fn tick_interval_matches_rate() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.tick_interval_ms(), 16);
        assert!((capture.window_duration_ms() - 42.666).abs() < 0.01);
    }
}
