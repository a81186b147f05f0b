use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognizer::EngineSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-run recognition switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizeOptions {
    pub enable_tilt_correction: bool,
    pub enable_noise_reduction: bool,
    /// Crop to the detected receipt outline before recognition.
    pub enable_boundary_detection: bool,
    /// Longer image side after resizing, in pixels.
    pub max_dimension: u32,
    /// Re-read the top date/amount regions in single-line mode.
    pub enable_two_pass: bool,
    pub max_rois: usize,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self {
            enable_tilt_correction: true,
            enable_noise_reduction: true,
            enable_boundary_detection: true,
            max_dimension: 1800,
            enable_two_pass: true,
            max_rois: 5,
        }
    }
}

/// Cue words added on top of the built-in tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub amount: Vec<String>,
    pub date: Vec<String>,
}

/// Everything the pipeline reads from `config.toml`.
///
/// ```toml
/// [options]
/// max_dimension = 1600
///
/// [engine]
/// language = "jpn+eng"
///
/// [keywords]
/// amount = ["ご請求額"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub options: RecognizeOptions,
    pub engine: EngineSettings,
    pub keywords: KeywordConfig,
}

impl PipelineConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = PipelineConfig::from_toml("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.options.max_dimension, 1800);
        assert_eq!(cfg.options.max_rois, 5);
        assert_eq!(cfg.engine.language, "jpn+eng");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = PipelineConfig::from_toml(
            r#"
            [options]
            enable_tilt_correction = false
            max_rois = 3

            [keywords]
            amount = ["ご請求額"]
            "#,
        )
        .unwrap();
        assert!(!cfg.options.enable_tilt_correction);
        assert!(cfg.options.enable_noise_reduction);
        assert_eq!(cfg.options.max_rois, 3);
        assert_eq!(cfg.keywords.amount, vec!["ご請求額".to_string()]);
        assert!(cfg.keywords.date.is_empty());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PipelineConfig::from_toml("[options\nmax_rois = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nlanguage = \"eng\"\n").unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.engine.language, "eng");

        let missing = PipelineConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
