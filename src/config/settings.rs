//! Application settings and configuration management

use crate::player::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Log output format for the binary.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the playback engine
    pub engine_url: String,
    /// Token sent to the engine (optional)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Authoritative status poll period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Local position interpolation period
    #[serde(default = "default_interpolation_interval_ms")]
    pub interpolation_interval_ms: u64,
    /// Delay before trusting engine status after a chapter switch
    #[serde(default = "default_chapter_settle_ms")]
    pub chapter_settle_ms: u64,
    #[serde(default = "default_sleep_fade_secs")]
    pub sleep_fade_secs: u64,
    #[serde(default = "default_sleep_fade_steps")]
    pub sleep_fade_steps: u32,
    /// Volume applied when the session starts
    #[serde(default = "default_volume")]
    pub default_volume: f64,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:7310".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_interpolation_interval_ms() -> u64 {
    16
}

fn default_chapter_settle_ms() -> u64 {
    300
}

fn default_sleep_fade_secs() -> u64 {
    30
}

fn default_sleep_fade_steps() -> u32 {
    30
}

fn default_volume() -> f64 {
    1.0
}

/// Error types for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            engine_url: default_engine_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            interpolation_interval_ms: default_interpolation_interval_ms(),
            chapter_settle_ms: default_chapter_settle_ms(),
            sleep_fade_secs: default_sleep_fade_secs(),
            sleep_fade_steps: default_sleep_fade_steps(),
            default_volume: default_volume(),
            log_format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("r-bookcli").join("config.json")
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.engine_url).map_err(|e| {
            ConfigError::Validation(format!("Engine URL '{}' is invalid: {}", self.engine_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Engine URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("Request timeout must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 || self.interpolation_interval_ms == 0 {
            return Err(ConfigError::Validation("Poll and interpolation intervals must be positive".to_string()));
        }
        if self.sleep_fade_steps == 0 {
            return Err(ConfigError::Validation("Sleep fade needs at least one step".to_string()));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(ConfigError::Validation(format!(
                "Default volume {} is outside [0, 1]",
                self.default_volume
            )));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }

    /// Timing configuration for a playback session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: StdDuration::from_millis(self.poll_interval_ms),
            interpolation_interval: StdDuration::from_millis(self.interpolation_interval_ms),
            chapter_settle_delay: StdDuration::from_millis(self.chapter_settle_ms),
            sleep_fade_duration: StdDuration::from_secs(self.sleep_fade_secs),
            sleep_fade_steps: self.sleep_fade_steps,
            ..SessionConfig::default()
        }
    }
}
