//! Which sources are due for a fetch this cycle.
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::db::{self, EligibleSource, Pool};
use crate::freshness::{cache_duration_minutes, is_stale};

/// Due sources, in id order, with the cache duration that applies to each.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Enabled sources with at least one active subscriber.
    pub total: usize,
    pub stale: Vec<(EligibleSource, i64)>,
}

/// Enabled, actively watched sources whose cache has lapsed. Failed sources
/// keep their old cache entry and so come back as soon as it expires.
pub async fn select_stale(pool: &Pool, cfg: &Config, now: DateTime<Utc>) -> Result<Selection> {
    let watched = db::watched_sources(pool, now).await?;
    let total = watched.len();
    let stale: Vec<(EligibleSource, i64)> = watched
        .into_iter()
        .filter_map(|source| {
            let minutes = cache_duration_minutes(&source, &cfg.cache);
            is_stale(source.cache_entry.as_ref(), minutes, now).then_some((source, minutes))
        })
        .collect();
    debug!(total, stale = stale.len(), "selected stale sources");
    Ok(Selection { total, stale })
}
