use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of upstream source kinds. The string forms are the stored tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Social posts (X/Twitter via an RSS bridge).
    X,
    /// Video channel uploads.
    Youtube,
    /// Newsletters.
    Substack,
    /// Public chat channels.
    Telegram,
    /// Generic websites.
    Website,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::X,
        SourceType::Youtube,
        SourceType::Substack,
        SourceType::Telegram,
        SourceType::Website,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::X => "x",
            SourceType::Youtube => "youtube",
            SourceType::Substack => "substack",
            SourceType::Telegram => "telegram",
            SourceType::Website => "website",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" | "twitter" => Some(SourceType::X),
            "youtube" => Some(SourceType::Youtube),
            "substack" => Some(SourceType::Substack),
            "telegram" => Some(SourceType::Telegram),
            "website" => Some(SourceType::Website),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
    Never,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
            FetchStatus::Never => "never",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FetchStatus::Success),
            "failed" => Some(FetchStatus::Failed),
            "never" => Some(FetchStatus::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }

    /// Unknown plan strings degrade to the free tier.
    pub fn parse_plan(s: &str) -> Self {
        if s == "pro" {
            PlanTier::Pro
        } else {
            PlanTier::Free
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Text,
    Video,
    Image,
    Article,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Article => "article",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: i64,
    pub source_type: SourceType,
    pub url: String,
    pub canonical_key: String,
    pub name: String,
    pub enabled: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_fetch_status: FetchStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub source_id: i64,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub media_type: String,
    pub category: String,
    pub metadata: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// One upstream item as produced by a fetcher, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedItem {
    pub external_id: String,
    pub title: Option<String>,
    pub content: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub media_kind: MediaKind,
    pub metadata: Map<String, Value>,
    pub published_at: DateTime<Utc>,
}

/// A fetched item after sanitization, truncation and categorization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub item: FetchedItem,
    pub category: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LockActive,
    NoStaleSources,
}

/// Aggregate outcome of one ingestion cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub total_sources: usize,
    pub stale_sources: usize,
    pub fetched_sources: usize,
    pub failed_sources: usize,
    pub new_posts: u64,
}

impl CycleReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: true,
            reason: Some(reason),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_through_tag() {
        for t in SourceType::ALL {
            assert_eq!(SourceType::parse_type(t.as_str()), Some(t));
        }
        assert_eq!(SourceType::parse_type("Twitter"), Some(SourceType::X));
        assert_eq!(SourceType::parse_type("myspace"), None);
    }

    #[test]
    fn skipped_report_serializes_reason_code() {
        let report = CycleReport::skipped(SkipReason::LockActive);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["skipped"], true);
        assert_eq!(json["reason"], "lock_active");
        assert_eq!(json["new_posts"], 0);
    }
}
