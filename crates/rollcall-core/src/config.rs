//! Tuning knobs for the recognition pipeline.
//!
//! Every value is installation-specific, so all of them live in one struct
//! that can be loaded from a TOML file. Missing keys take their defaults.

use crate::types::{RecorderId, SectionId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Euclidean distance strictly below which a probe matches a stored embedding.
    pub match_threshold: f32,
    /// Horizontal nose offset (pixels) beyond which a head counts as turned.
    pub orientation_offset: f32,
    /// Length of every embedding the network produces.
    pub embedding_dim: usize,
    /// Minimum SCRFD score for a detection to count as a face.
    pub detection_confidence: f32,
    /// Number of images required by an enrollment.
    pub enroll_images: usize,
    /// Section used when no section is scheduled for a room/subject pair.
    pub default_section_id: SectionId,
    /// `recorded_by` written on automatically recorded attendance.
    pub system_recorder_id: RecorderId,
    /// Upper bound on the descriptor scan, in milliseconds.
    pub scan_budget_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            orientation_offset: 15.0,
            embedding_dim: 128,
            detection_confidence: 0.5,
            enroll_images: 3,
            default_section_id: 1,
            system_recorder_id: 1,
            scan_budget_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    pub fn scan_budget(&self) -> Duration {
        Duration::from_millis(self.scan_budget_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if !(self.orientation_offset.is_finite() && self.orientation_offset >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "orientation_offset must be non-negative, got {}",
                self.orientation_offset
            )));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detection_confidence must be within [0, 1], got {}",
                self.detection_confidence
            )));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be non-zero".into()));
        }
        if self.enroll_images == 0 {
            return Err(ConfigError::Invalid("enroll_images must be non-zero".into()));
        }
        Ok(())
    }
}

/// Base directory for rollcall data: `$XDG_DATA_HOME/rollcall`, falling back
/// to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Default location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.enroll_images, 3);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = PipelineConfig::from_toml_str(
            "match_threshold = 0.45\ndefault_section_id = 7\n",
        )
        .unwrap();
        assert!((config.match_threshold - 0.45).abs() < 1e-6);
        assert_eq!(config.default_section_id, 7);
        assert_eq!(config.orientation_offset, 15.0);
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        let err = PipelineConfig::from_toml_str("match_threshold = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_types() {
        let err = PipelineConfig::from_toml_str("embedding_dim = \"wide\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "scan_budget_ms = 250\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.scan_budget(), Duration::from_millis(250));
    }
}
