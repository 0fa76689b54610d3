//! Source fetchers: one strategy per source type behind a single `Fetcher`
//! trait, looked up by `SourceType` in a `FetcherRegistry`.
//!
//! Fetchers only talk to the network. They never touch the database, so the
//! worker can wrap any of them in the same timeout/retry policy.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use scraper::Selector;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config;
use crate::model::{FetchedItem, Source, SourceType};

pub mod feed;
pub mod substack;
pub mod telegram;
pub mod website;
pub mod x;
pub mod youtube;

pub use substack::SubstackFetcher;
pub use telegram::TelegramFetcher;
pub use website::WebsiteFetcher;
pub use x::XFetcher;
pub use youtube::YoutubeFetcher;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Items published at or after `since`, newest state of the upstream.
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>>;
}

/// Lookup table from source type to its fetch strategy.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<SourceType, Arc<dyn Fetcher>>,
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.fetchers.keys().map(SourceType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("FetcherRegistry")
            .field("types", &types)
            .finish()
    }
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five production strategies sharing one HTTP client.
    pub fn from_config(cfg: &config::Fetchers) -> Result<Self> {
        let http = build_http_client(&cfg.user_agent)?;
        let registry = Self::new()
            .with(
                SourceType::X,
                Arc::new(XFetcher::new(http.clone(), cfg.rsshub_base_url.clone())),
            )
            .with(
                SourceType::Youtube,
                Arc::new(YoutubeFetcher::new(
                    http.clone(),
                    cfg.youtube_api_base.clone(),
                    cfg.youtube_api_key.clone(),
                )),
            )
            .with(SourceType::Substack, Arc::new(SubstackFetcher::new(http.clone())))
            .with(SourceType::Telegram, Arc::new(TelegramFetcher::new(http.clone())))
            .with(SourceType::Website, Arc::new(WebsiteFetcher::new(http)));
        Ok(registry)
    }

    pub fn with(mut self, source_type: SourceType, fetcher: Arc<dyn Fetcher>) -> Self {
        self.register(source_type, fetcher);
        self
    }

    pub fn register(&mut self, source_type: SourceType, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(source_type, fetcher);
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(&source_type).cloned()
    }
}

pub fn build_http_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")
}

/// GET a page body. Transport failures are errors; a non-success status is
/// logged and reported as `None` so the caller can yield no items.
pub(crate) async fn get_text(http: &Client, url: &str) -> Result<Option<String>> {
    let res = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;
    if !res.status().is_success() {
        debug!(url, status = %res.status(), "upstream returned non-success status");
        return Ok(None);
    }
    let body = res
        .text()
        .await
        .with_context(|| format!("failed to read body from {}", url))?;
    Ok(Some(body))
}

/// GET a feed body; any non-success status is an error.
pub(crate) async fn get_feed_bytes(http: &Client, url: &str) -> Result<Vec<u8>> {
    let res = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("feed request to {} failed", url))?
        .error_for_status()
        .with_context(|| format!("feed {} returned an error status", url))?;
    let bytes = res
        .bytes()
        .await
        .with_context(|| format!("failed to read feed body from {}", url))?;
    Ok(bytes.to_vec())
}

/// Compile a selector literal.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Parse the timestamp formats seen in feeds and page metadata.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Hex SHA-256 over the concatenated parts, for items with no upstream id.
pub fn synthetic_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Roughly 220 words a minute, never less than one.
pub fn read_time_minutes(content: &str) -> u64 {
    let words = content.split_whitespace().count() as f64;
    ((words / 220.0).round() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_in_common_formats() {
        let a = parse_timestamp("2026-03-01T10:00:00Z").unwrap();
        let b = parse_timestamp("Sun, 01 Mar 2026 10:00:00 +0000").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            parse_timestamp("2026-03-01").unwrap().to_rfc3339(),
            "2026-03-01T00:00:00+00:00"
        );
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn synthetic_ids_are_stable_hex() {
        let a = synthetic_id(&["https://example.com", "2026-03-01T10:00:00.000Z"]);
        let b = synthetic_id(&["https://example.com", "2026-03-01T10:00:00.000Z"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, synthetic_id(&["https://example.com", "2026-03-01T10:00:01.000Z"]));
    }

    #[test]
    fn read_time_floor_is_one_minute() {
        assert_eq!(read_time_minutes(""), 1);
        assert_eq!(read_time_minutes(&"word ".repeat(660)), 3);
    }

    #[test]
    fn registry_from_config_covers_every_type() {
        let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
        let registry = FetcherRegistry::from_config(&cfg.fetchers).unwrap();
        for t in SourceType::ALL {
            assert!(registry.get(t).is_some(), "missing fetcher for {}", t.as_str());
        }
        assert!(FetcherRegistry::new().get(SourceType::X).is_none());
    }
}
