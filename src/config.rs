//! Configuration loader and validator for the ingestion worker.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::PlanTier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub cache: Cache,
    pub content: Content,
    pub limits: Limits,
    pub fetchers: Fetchers,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub cycle_interval_minutes: u64,
    pub fetch_timeout_ms: u64,
    pub lock_stale_minutes: i64,
}

/// Freshness windows per plan tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub free_minutes: i64,
    pub pro_minutes: i64,
}

/// Content floor and size ceiling applied by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Content {
    pub start_date: DateTime<Utc>,
    pub max_bytes: usize,
}

/// Manual refresh caps per plan tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Limits {
    pub free_manual_refresh_per_hour: i64,
    pub pro_manual_refresh_per_hour: i64,
}

/// Outbound fetcher settings and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fetchers {
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    pub youtube_api_base: String,
    pub rsshub_base_url: String,
    pub user_agent: String,
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_minutes * 60)
    }
}

impl Cache {
    pub fn minutes_for(&self, plan: PlanTier) -> i64 {
        match plan {
            PlanTier::Free => self.free_minutes,
            PlanTier::Pro => self.pro_minutes,
        }
    }
}

impl Limits {
    pub fn manual_refresh_cap(&self, plan: PlanTier) -> i64 {
        match plan {
            PlanTier::Free => self.free_manual_refresh_per_hour,
            PlanTier::Pro => self.pro_manual_refresh_per_hour,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Default SQLite location under the data dir, unless `DATABASE_URL` is set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/ingest.db", self.app.resolved_data_dir()))
    }

    /// Fill credentials from the environment when the file leaves them out.
    pub fn apply_env_overrides(&mut self) {
        if self.fetchers.youtube_api_key.is_none() {
            self.fetchers.youtube_api_key = std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
        if let Ok(base) = std::env::var("RSSHUB_BASE_URL") {
            if !base.trim().is_empty() {
                self.fetchers.rsshub_base_url = base;
            }
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.cycle_interval_minutes == 0 {
        return Err(ConfigError::Invalid("app.cycle_interval_minutes must be > 0"));
    }
    if cfg.app.fetch_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.fetch_timeout_ms must be > 0"));
    }
    if cfg.app.lock_stale_minutes <= 0 {
        return Err(ConfigError::Invalid("app.lock_stale_minutes must be > 0"));
    }

    if cfg.cache.free_minutes <= 0 {
        return Err(ConfigError::Invalid("cache.free_minutes must be > 0"));
    }
    if cfg.cache.pro_minutes <= 0 {
        return Err(ConfigError::Invalid("cache.pro_minutes must be > 0"));
    }
    if cfg.cache.pro_minutes > cfg.cache.free_minutes {
        return Err(ConfigError::Invalid(
            "cache.pro_minutes must not exceed cache.free_minutes",
        ));
    }

    if cfg.content.max_bytes == 0 {
        return Err(ConfigError::Invalid("content.max_bytes must be > 0"));
    }

    if cfg.limits.free_manual_refresh_per_hour <= 0 {
        return Err(ConfigError::Invalid(
            "limits.free_manual_refresh_per_hour must be > 0",
        ));
    }
    if cfg.limits.pro_manual_refresh_per_hour <= 0 {
        return Err(ConfigError::Invalid(
            "limits.pro_manual_refresh_per_hour must be > 0",
        ));
    }

    if cfg.fetchers.youtube_api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("fetchers.youtube_api_base must be non-empty"));
    }
    if cfg.fetchers.rsshub_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("fetchers.rsshub_base_url must be non-empty"));
    }

    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  cycle_interval_minutes: 15
  fetch_timeout_ms: 10000
  lock_stale_minutes: 30

cache:
  free_minutes: 30
  pro_minutes: 15

content:
  start_date: "2026-02-20T00:00:00Z"
  max_bytes: 51200

limits:
  free_manual_refresh_per_hour: 5
  pro_manual_refresh_per_hour: 20

fetchers:
  youtube_api_key: null
  youtube_api_base: "https://www.googleapis.com/youtube/v3/"
  rsshub_base_url: "http://localhost:1200"
  user_agent: "ingest-worker/0.1"
"#
}
