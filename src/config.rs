//! Overlay configuration.
//!
//! Loaded from `<config dir>/feature-overlay/config.json`, with environment
//! overrides:
//! - `FEATURE_OVERLAY_MODE` - `buffered` or `direct`
//! - `FEATURE_OVERLAY_DB` - path of the SQLite store

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::session::SessionMode;

const APP_NAME: &str = "feature-overlay";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    /// Mode of sessions built with [`Session::from_config`](crate::session::Session::from_config).
    #[serde(default = "default_mode")]
    pub default_mode: SessionMode,
    /// SQLite store location. `None` uses the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_mode() -> SessionMode {
    SessionMode::Buffered
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            database_path: None,
        }
    }
}

impl OverlayConfig {
    /// Load configuration from the user's config directory.
    /// Returns default config if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// [`load`](Self::load), then apply environment overrides.
    pub fn from_env() -> Self {
        Self::load().with_overrides(
            std::env::var("FEATURE_OVERLAY_MODE").ok(),
            std::env::var("FEATURE_OVERLAY_DB").ok(),
        )
    }

    fn with_overrides(mut self, mode: Option<String>, db: Option<String>) -> Self {
        if let Some(mode) = mode {
            match SessionMode::from_str(&mode) {
                Some(m) => self.default_mode = m,
                None => tracing::warn!("Ignoring unknown FEATURE_OVERLAY_MODE: {}", mode),
            }
        }
        if let Some(db) = db {
            self.database_path = Some(PathBuf::from(db));
        }
        self
    }

    /// Save the configuration to the user's config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
