//! View models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CacheEntry, FetchStatus, Source};

/// A source together with what the freshness tracker needs to judge it.
#[derive(Debug, Clone)]
pub struct EligibleSource {
    pub source: Source,
    pub cache_entry: Option<CacheEntry>,
    /// At least one unmuted subscriber is on the pro plan.
    pub has_pro_subscriber: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestFetched {
    pub id: i64,
    pub name: String,
    pub last_fetched_at: DateTime<Utc>,
    pub last_fetch_status: FetchStatus,
}

/// Snapshot consumed by operator status views.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub lock_active: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub total_sources: i64,
    pub stale_sources: i64,
    pub failed_sources: i64,
    pub latest_fetched: Option<LatestFetched>,
}
