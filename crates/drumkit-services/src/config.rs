//! Engine configuration

use std::path::Path;

use drumkit_core::{DEFAULT_BPM, MAX_BPM, MIN_BPM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tempo settings for a sequencer session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tempo a new sequencer starts at
    pub initial_bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_bpm: DEFAULT_BPM,
            min_bpm: MIN_BPM,
            max_bpm: MAX_BPM,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_bpm.is_finite() && self.max_bpm.is_finite()) || self.min_bpm <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tempo range {}..={} must be positive and finite",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.min_bpm > self.max_bpm {
            return Err(ConfigError::Invalid(format!(
                "min_bpm {} exceeds max_bpm {}",
                self.min_bpm, self.max_bpm
            )));
        }
        if !self.accepts_bpm(self.initial_bpm) {
            return Err(ConfigError::Invalid(format!(
                "initial_bpm {} outside {}..={}",
                self.initial_bpm, self.min_bpm, self.max_bpm
            )));
        }
        Ok(())
    }

    pub fn accepts_bpm(&self, bpm: f64) -> bool {
        bpm.is_finite() && (self.min_bpm..=self.max_bpm).contains(&bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = EngineConfig::from_toml_str("initial_bpm = 90.0").unwrap();
        assert_eq!(config.initial_bpm, 90.0);
        assert_eq!(config.max_bpm, MAX_BPM);

        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_rejects_initial_outside_range() {
        let err = EngineConfig::from_toml_str("initial_bpm = 300.0\nmax_bpm = 200.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("min_bpm = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = EngineConfig::from_toml_str("initial_bpm = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/drumkit.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_accepts_bpm() {
        let config = EngineConfig::default();
        assert!(config.accepts_bpm(120.0));
        assert!(!config.accepts_bpm(0.0));
        assert!(!config.accepts_bpm(f64::NAN));
        assert!(!config.accepts_bpm(1001.0));
    }
}
