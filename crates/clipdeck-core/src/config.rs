//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! base URL, token storage backend, expiry-check timing, and the last used
//! username.
//!
//! Configuration is stored at `~/.config/clipdeck/config.json`. Environment
//! variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_BASE_URL;
use crate::auth::{SessionSettings, TokenStoreKind};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "clipdeck";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "CLIPDECK_API_URL";
pub const ENV_TOKEN_STORE: &str = "CLIPDECK_TOKEN_STORE";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub token_store: TokenStoreKind,
    pub check_interval_minutes: Option<u64>,
    pub refresh_threshold_minutes: Option<i64>,
    pub last_username: Option<String>,
    /// Also write logs to daily files in this directory
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load the config file (defaults when absent) and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = Some(url.trim().to_string());
        }
        if let Some(kind) = lookup(ENV_TOKEN_STORE).filter(|v| !v.trim().is_empty()) {
            self.token_store = kind
                .parse()
                .with_context(|| format!("Invalid {}", ENV_TOKEN_STORE))?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Backend base URL, falling back to the local development address
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::default();
        if let Some(minutes) = self.check_interval_minutes.filter(|m| *m > 0) {
            settings.check_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = self.refresh_threshold_minutes.filter(|m| *m >= 0) {
            settings.refresh_threshold = chrono::Duration::minutes(minutes);
        }
        settings
    }
}
