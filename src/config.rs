//! Tool configuration: data directory, concurrency, retry schedule, keys.
//!
//! Configuration loads from `~/.config/sysrev/config.toml` when present,
//! with built-in defaults otherwise. API keys are environment-only and are
//! never written to the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm::RetryPolicy;
use crate::protocol::Provider;

/// Tool-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the review database. Supports `~` expansion.
    pub data_dir: String,
    /// Citations screened concurrently per stage run.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

fn default_data_dir() -> String {
    directories::ProjectDirs::from("", "", "sysrev")
        .map(|d| d.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "~/.sysrev".to_string())
}

/// Default config file location.
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sysrev")
        .map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration, preferring an explicit path over the default
    /// location. A missing file yields defaults; a malformed one is fatal.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Invalid config TOML: {}", path.display()))?;
        Ok(config)
    }

    /// Expanded data directory.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }

    /// Path of the review database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("reviews.db")
    }
}

/// API key lookup for a provider, from the environment.
pub fn api_key(provider: Provider) -> Result<String> {
    let var = match provider {
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Openai => "OPENAI_API_KEY",
        Provider::Openrouter => "OPENROUTER_API_KEY",
    };
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .with_context(|| format!("Missing API key: set {var} for provider '{}'", provider.as_str()))
}
