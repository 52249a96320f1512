//! Configuration for the dissector front end

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::render::PageOptions;

/// Front-end configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes per line in the hex layout
    pub column_len: usize,
    /// Stylesheet linked from the generated page
    pub stylesheet: String,
    /// Script linked from the generated page
    pub script: String,
    /// Default `tracing` filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            column_len: 20,
            stylesheet: "hex.css".to_string(),
            script: "hex.js".to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from default location or return default config
    pub fn load_or_default() -> Self {
        // Try to load from ~/.config/bincarve/config.json
        if let Some(config_path) = default_path() {
            if config_path.exists() {
                match Self::load(&config_path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                    }
                }
            }
        }
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.column_len == 0 {
            return Err(ConfigError::Invalid("column_len must be at least 1"));
        }
        Ok(())
    }

    /// Page settings for the HTML renderer
    pub fn page_options(&self) -> PageOptions {
        PageOptions {
            column_len: self.column_len,
            stylesheet: self.stylesheet.clone(),
            script: self.script.clone(),
        }
    }
}

/// Get the default configuration file path
pub fn default_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("bincarve")
            .join("config.json")
    })
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
