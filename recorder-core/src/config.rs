//! # Engine Configuration
//!
//! Tunable constants for the detector, the transport and the host controls.
//! Every field has a default, so a config file only needs the values it
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Parameters of the autocorrelation pitch detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Number of samples analysed per `detect()` call.
    pub window_size: usize,
    /// RMS level below which the window is treated as silence.
    pub rms_threshold: f32,
    /// Correlation a lag must exceed to count as a period candidate.
    pub correlation_threshold: f32,
    /// Minimum best correlation for the unlocked fallback estimate.
    pub fallback_threshold: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            rms_threshold: 0.01,
            correlation_threshold: 0.9,
            fallback_threshold: 0.01,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_bpm: u32,
    pub min_bpm: u32,
    pub max_bpm: u32,
    pub bpm_step: u32,
    /// Length of a freshly created step grid.
    pub initial_steps: usize,
    pub default_volume_db: f32,
    pub min_volume_db: f32,
    pub max_volume_db: f32,
    /// How far ahead of the audio clock the transport hands events to the synth.
    pub lookahead_secs: f64,
    /// Play four clicks before the sequence starts.
    pub count_in: bool,
    pub pitch: PitchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_bpm: 120,
            min_bpm: 60,
            max_bpm: 180,
            bpm_step: 5,
            initial_steps: 16,
            default_volume_db: -5.0,
            min_volume_db: -30.0,
            max_volume_db: 0.0,
            lookahead_secs: 0.1,
            count_in: false,
            pitch: PitchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        config.validate()?;
        log::debug!(target: "config", "Loaded engine config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bpm == 0 {
            return Err(ConfigError::Invalid("min_bpm must be positive".into()));
        }
        if self.min_bpm > self.max_bpm {
            return Err(ConfigError::Invalid(format!(
                "min_bpm ({}) exceeds max_bpm ({})",
                self.min_bpm, self.max_bpm
            )));
        }
        if !(self.min_bpm..=self.max_bpm).contains(&self.default_bpm) {
            return Err(ConfigError::Invalid(format!(
                "default_bpm ({}) outside {}..={}",
                self.default_bpm, self.min_bpm, self.max_bpm
            )));
        }
        if self.min_volume_db > self.max_volume_db {
            return Err(ConfigError::Invalid("volume range is inverted".into()));
        }
        if self.pitch.window_size < 4 {
            return Err(ConfigError::Invalid("pitch window must hold at least 4 samples".into()));
        }
        if self.lookahead_secs.is_nan() || self.lookahead_secs < 0.0 {
            return Err(ConfigError::Invalid("lookahead must be non-negative".into()));
        }
        Ok(())
    }

    /// Clamps a tempo into the configured range.
    pub fn clamp_bpm(&self, bpm: u32) -> u32 {
        bpm.clamp(self.min_bpm, self.max_bpm)
    }

    /// Moves the tempo one control step up (`up = true`) or down, staying in range.
    pub fn step_bpm(&self, bpm: u32, up: bool) -> u32 {
        let next = if up {
            bpm.saturating_add(self.bpm_step)
        } else {
            bpm.saturating_sub(self.bpm_step)
        };
        self.clamp_bpm(next)
    }

    pub fn clamp_volume(&self, db: f32) -> f32 {
        db.clamp(self.min_volume_db, self.max_volume_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pitch.window_size, 2048);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "default_bpm": 90, "pitch": { "rms_threshold": 0.02 } }"#)
                .unwrap();
        assert_eq!(config.default_bpm, 90);
        assert_eq!(config.max_bpm, 180);
        assert_eq!(config.pitch.rms_threshold, 0.02);
        assert_eq!(config.pitch.window_size, 2048);
    }

    #[test]
    fn rejects_inconsistent_ranges() {
        let mut config = EngineConfig::default();
        config.min_bpm = 200;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.default_bpm = 30;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.min_bpm = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tempo_controls_stay_in_range() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_bpm(10), 60);
        assert_eq!(config.clamp_bpm(400), 180);
        assert_eq!(config.step_bpm(120, true), 125);
        assert_eq!(config.step_bpm(178, true), 180);
        assert_eq!(config.step_bpm(62, false), 60);
        assert_eq!(config.clamp_volume(-80.0), -30.0);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load("/nonexistent/recorder.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
