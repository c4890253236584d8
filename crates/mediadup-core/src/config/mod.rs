//! Configuration management for mediadup.
//!
//! Configuration is loaded from a TOML file with strict typing: every section
//! has defaults, unknown keys are rejected, and values are range-checked after
//! parsing.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Tree, database and cache locations
    pub general: GeneralConfig,

    /// Media kind classification
    pub media: MediaConfig,

    /// Content hashing
    pub hashing: HashingConfig,

    /// Image signature layout
    pub image: ImageConfig,

    /// Video resampling and color curve
    pub video: VideoConfig,

    /// Worker pools and batching
    pub pipeline: PipelineConfig,

    /// Perceptual similarity thresholds
    pub similarity: SimilarityConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// - macOS: ~/Library/Application Support/com.mediadup.mediadup/config.toml
    /// - Linux: ~/.config/mediadup/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\mediadup\config\config.toml
    ///
    /// Falls back to ~/.mediadup/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "mediadup", "mediadup")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".mediadup").join("config.toml")
            })
    }

    /// Resolved root of the media tree (with ~ expansion).
    pub fn root_dir(&self) -> PathBuf {
        expand(&self.general.root_dir)
    }

    /// Resolved database file path (with ~ expansion).
    pub fn db_file(&self) -> PathBuf {
        expand(&self.general.db_file)
    }

    /// Resolved signature cache directory (with ~ expansion).
    pub fn signature_cache_dir(&self) -> PathBuf {
        expand(&self.general.signature_cache_dir)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}
