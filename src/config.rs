//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub timers: TimerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub direct_auth_path: String,
    pub bot_info_path: String,
    pub error_path: String,
    pub bot_link_base: String,
    /// Bot username known ahead of time; skips the bot-info lookup on 401.
    #[serde(default)]
    pub bot_username: Option<String>,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub storage_key: String,
    pub ttl_minutes: i64,
    /// Copy the refresh token into rewritten link query strings.
    #[serde(default)]
    pub refresh_token_in_url: bool,
    pub link_prefix: String,
    /// Overrides the platform default location of the storage file.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    pub liveness_interval_seconds: u64,
    pub refresh_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;

        if let Ok(base_url) = env::var("TWA_BASE_URL") {
            config.api.base_url = base_url;
        }

        if let Ok(username) = env::var("TWA_BOT_USERNAME") {
            config.api.bot_username = Some(username);
        }

        if let Ok(path) = env::var("TWA_STORAGE_PATH") {
            config.auth.storage_path = Some(PathBuf::from(path));
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse the embedded config.toml without applying overrides.
    pub fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid api.base_url: {}", self.api.base_url))?;

        if self.auth.storage_key.is_empty() {
            anyhow::bail!("auth.storage_key must not be empty");
        }

        if self.auth.ttl_minutes <= 0 {
            anyhow::bail!("auth.ttl_minutes must be positive");
        }
        if chrono::Duration::try_minutes(self.auth.ttl_minutes).is_none() {
            anyhow::bail!("auth.ttl_minutes is out of range: {}", self.auth.ttl_minutes);
        }

        if !self.auth.link_prefix.starts_with('/') {
            anyhow::bail!("auth.link_prefix must start with '/'");
        }

        if self.timers.liveness_interval_seconds == 0 || self.timers.refresh_interval_seconds == 0 {
            anyhow::bail!("Timer intervals must be at least one second");
        }

        Ok(())
    }

    /// Origin every relative path is resolved against.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url).context("Invalid api.base_url")
    }

    /// Get the refresh endpoint URL.
    pub fn refresh_url(&self) -> String {
        self.endpoint(&self.api.refresh_path)
    }

    /// Get the direct auth endpoint URL.
    pub fn direct_auth_url(&self) -> String {
        self.endpoint(&self.api.direct_auth_path)
    }

    /// Get the bot info endpoint URL.
    pub fn bot_info_url(&self) -> String {
        self.endpoint(&self.api.bot_info_path)
    }

    /// Get the error page URL (without the message parameter).
    pub fn error_page_url(&self) -> String {
        self.endpoint(&self.api.error_path)
    }

    /// Record lifetime. An out-of-range value yields zero, so records expire.
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.auth.ttl_minutes).unwrap_or_else(chrono::Duration::zero)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.timers.liveness_interval_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.timers.refresh_interval_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_seconds)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    let mut config = Config::embedded().unwrap();
    config.api.base_url = base_url.to_string();
    config
}
