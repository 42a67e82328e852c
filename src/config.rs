//! Configuration loader and validator for the repost service.
use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid timezone: {0}")]
    Timezone(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub window: Window,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub port: u16,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

/// Credentials for both Telegram clients plus the channel pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
    /// One-time login code; usually supplied through `TELEGRAM_AUTH_CODE`.
    #[serde(default)]
    pub auth_code: Option<String>,
    /// Base64 session exported elsewhere; wins over the stored session.
    #[serde(default)]
    pub session_string: Option<String>,
    pub bot_token: String,
    pub source_channel: String,
    pub target_channel_id: i64,
}

/// Inclusive calendar-day range of posts to ingest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/repostbot.db", self.app.data_dir))
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.app
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.app.timezone.clone()))
    }

    /// Window bounds as zoned instants. Each bound sits at local noon, which
    /// no DST transition touches; only the calendar day matters downstream.
    pub fn window(&self) -> Result<(DateTime<Tz>, DateTime<Tz>), ConfigError> {
        let tz = self.timezone()?;
        let start = local_noon(tz, self.window.start_date)
            .ok_or(ConfigError::Invalid("window.start_date is not representable"))?;
        let end = local_noon(tz, self.window.end_date)
            .ok_or(ConfigError::Invalid("window.end_date is not representable"))?;
        Ok((start, end))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.app.max_retries,
            Duration::from_secs(self.app.retry_delay_seconds),
        )
    }
}

fn local_noon(tz: Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    tz.from_local_datetime(&noon).single()
}

/// Load configuration from a YAML file, apply environment overrides and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    normalize(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

/// Secrets that are only needed once are easier to pass through the
/// environment than to write into the config file.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(code) = lookup("TELEGRAM_AUTH_CODE").filter(|v| !v.trim().is_empty()) {
        cfg.telegram.auth_code = Some(code);
    }
    if let Some(session) = lookup("TELEGRAM_SESSION").filter(|v| !v.trim().is_empty()) {
        cfg.telegram.session_string = Some(session);
    }
}

fn normalize(cfg: &mut Config) {
    cfg.telegram.source_channel = cfg
        .telegram
        .source_channel
        .trim()
        .trim_start_matches('@')
        .to_string();
    cfg.telegram.auth_code = cfg
        .telegram
        .auth_code
        .take()
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty());
    cfg.telegram.session_string = cfg
        .telegram
        .session_string
        .take()
        .filter(|s| !s.trim().is_empty());
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.port == 0 {
        return Err(ConfigError::Invalid("app.port must be > 0"));
    }
    if cfg.app.max_retries == 0 {
        return Err(ConfigError::Invalid("app.max_retries must be > 0"));
    }
    cfg.timezone()?;

    if cfg.telegram.api_id <= 0 {
        return Err(ConfigError::Invalid("telegram.api_id must be > 0"));
    }
    if cfg.telegram.api_hash.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.api_hash must be non-empty"));
    }
    if cfg.telegram.phone.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.phone must be non-empty"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.source_channel.is_empty() {
        return Err(ConfigError::Invalid("telegram.source_channel must be non-empty"));
    }
    if cfg.telegram.target_channel_id == 0 {
        return Err(ConfigError::Invalid("telegram.target_channel_id must be non-zero"));
    }

    if cfg.window.start_date > cfg.window.end_date {
        return Err(ConfigError::Invalid(
            "window.start_date must be before or equal to window.end_date",
        ));
    }
    cfg.window()?;

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  port: 8080
  timezone: "Europe/Moscow"
  max_retries: 3
  retry_delay_seconds: 30

telegram:
  api_id: 123456
  api_hash: "YOUR_TELEGRAM_API_HASH"
  phone: "+10000000000"
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  source_channel: "@source_channel"
  target_channel_id: -1001234567890

window:
  start_date: "2024-01-01"
  end_date: "2024-12-31"
"#
}
