use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::preprocess::VariantSettings;
use crate::types::EngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for one [`crate::ReceiptPipeline`]. Every field has a default,
/// so an empty TOML document is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tesseract languages for the two general configs, e.g. `rus+eng`.
    pub language: String,
    /// Language of the whitelist-restricted config.
    pub fallback_language: String,
    /// Explicit `tesseract` executable; `PATH` is searched otherwise.
    pub tesseract_cmd: Option<PathBuf>,
    pub tessdata_dir: Option<PathBuf>,
    pub dpi: u32,
    pub min_working_size: u32,
    pub border: u32,
    pub skew_threshold_degrees: f64,
    /// Recognition workers; all cores when unset.
    pub threads: Option<usize>,
    /// Rule table replacing the built-in receipt profile.
    pub rules: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: "rus+eng".into(),
            fallback_language: "rus".into(),
            tesseract_cmd: None,
            tessdata_dir: None,
            dpi: 300,
            min_working_size: 1900,
            border: 8,
            skew_threshold_degrees: 0.5,
            threads: None,
            rules: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn engine_configs(&self) -> Vec<EngineConfig> {
        EngineConfig::receipt_set(&self.language, &self.fallback_language)
    }

    pub fn variant_settings(&self) -> VariantSettings {
        VariantSettings {
            min_working_size: self.min_working_size,
            border: self.border,
            skew_threshold: self.skew_threshold_degrees,
            ..VariantSettings::default()
        }
    }
}
