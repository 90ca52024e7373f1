use ::config::{Config as ConfigSource, Environment, File};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "page_monitor.toml";
pub const CONFIG_PATH_ENV: &str = "PAGE_MONITOR_CONFIG";
pub const ENV_PREFIX: &str = "PAGE_MONITOR";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("minutes_between_check must be at least 1, got {0}")]
    InvalidInterval(u32),
    #[error("unknown fetch backend '{0}'")]
    UnknownBackend(String),
    #[error("fetch backend '{0}' is not available")]
    UnsupportedBackend(FetchBackend),
    #[error("invalid boolean value '{0}'")]
    InvalidFlag(String),
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
}

/// Which fetcher implementation retrieves a watch's raw content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchBackend {
    #[default]
    HtmlRequests,
    HtmlWebdriver,
}

impl FetchBackend {
    pub fn key(&self) -> &'static str {
        match self {
            FetchBackend::HtmlRequests => "html_requests",
            FetchBackend::HtmlWebdriver => "html_webdriver",
        }
    }

    pub fn from_key(key: &str) -> Result<Self, ConfigError> {
        match key.trim() {
            "html_requests" => Ok(FetchBackend::HtmlRequests),
            "html_webdriver" => Ok(FetchBackend::HtmlWebdriver),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for FetchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Parses a submitted checkbox/select value for a boolean setting.
///
/// A missing value is `false`, the same as an explicit `"false"`. This mirrors
/// how an unticked checkbox is simply absent from a submitted form.
pub fn parse_flag(value: Option<&str>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag(raw.to_string())),
    }
}

/// Accepts only absolute http(s) urls.
pub fn validate_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|_| ConfigError::InvalidUrl(trimmed.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::InvalidUrl(trimmed.to_string())),
    }
}

/// Process-wide defaults every watch inherits unless it overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchDefaults {
    pub minutes_between_check: u32,
    pub render_anchor_tag_content: bool,
    pub fetch_backend: FetchBackend,
}

impl Default for WatchDefaults {
    fn default() -> Self {
        Self {
            minutes_between_check: 180,
            render_anchor_tag_content: false,
            fetch_backend: FetchBackend::HtmlRequests,
        }
    }
}

/// Per-watch overrides. `None` means "inherit the process default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub minutes_between_check: Option<u32>,
    pub render_anchor_tag_content: Option<bool>,
    pub fetch_backend: Option<FetchBackend>,
}

impl WatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(minutes) = self.minutes_between_check {
            if minutes < 1 {
                return Err(ConfigError::InvalidInterval(minutes));
            }
        }
        Ok(())
    }
}

/// Configuration in force for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub minutes_between_check: u32,
    pub render_anchor_tag_content: bool,
    pub fetch_backend: FetchBackend,
}

impl EffectiveConfig {
    pub fn check_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes_between_check))
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        WatchDefaults::default().resolve(&WatchConfig::default())
    }
}

impl WatchDefaults {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minutes_between_check < 1 {
            return Err(ConfigError::InvalidInterval(self.minutes_between_check));
        }
        Ok(())
    }

    pub fn resolve(&self, overrides: &WatchConfig) -> EffectiveConfig {
        // An unset anchor flag and an explicit `false` both land here as `false`.
        let render_anchor_tag_content = match overrides.render_anchor_tag_content {
            Some(true) => true,
            Some(false) => false,
            None => self.render_anchor_tag_content,
        };

        EffectiveConfig {
            minutes_between_check: overrides
                .minutes_between_check
                .unwrap_or(self.minutes_between_check),
            render_anchor_tag_content,
            fetch_backend: overrides.fetch_backend.unwrap_or(self.fetch_backend),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub url: String,
    #[serde(default)]
    pub overrides: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: String,
    pub tick_seconds: u64,
    pub max_concurrent_checks: usize,
    pub settle_delay_ms: u64,
    pub user_agent: String,
    pub request_timeout_seconds: u64,
    pub fetch_attempts: u32,
    pub notification_webhook: Option<String>,
    pub log_format: LogFormat,
    pub defaults: WatchDefaults,
    pub watches: Vec<WatchEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "page_monitor.db".to_string(),
            tick_seconds: 5,
            max_concurrent_checks: 4,
            settle_delay_ms: 0,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36".to_string(),
            request_timeout_seconds: 25,
            fetch_attempts: 1,
            notification_webhook: None,
            log_format: LogFormat::Text,
            defaults: WatchDefaults::default(),
            watches: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from the optional config file, then `PAGE_MONITOR__*` env vars.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings: Settings = ConfigSource::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.defaults.validate()?;
        if self.max_concurrent_checks == 0 {
            anyhow::bail!("max_concurrent_checks must be at least 1");
        }
        if self.tick_seconds == 0 {
            anyhow::bail!("tick_seconds must be at least 1");
        }
        for entry in &self.watches {
            validate_url(&entry.url)?;
            entry.overrides.validate()?;
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
