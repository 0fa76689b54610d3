//! Cache freshness: how long a source's last successful fetch stays valid,
//! and recording fetch outcomes.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config;
use crate::db::{self, EligibleSource, Pool};
use crate::model::{CacheEntry, PlanTier};

/// Pro duration if any active subscriber is on the pro plan, free otherwise.
pub fn cache_duration_minutes(source: &EligibleSource, cache: &config::Cache) -> i64 {
    let tier = if source.has_pro_subscriber {
        PlanTier::Pro
    } else {
        PlanTier::Free
    };
    cache.minutes_for(tier)
}

/// A source is stale when it has no cache entry or its last successful fetch
/// is older than `duration_minutes`.
pub fn is_stale(entry: Option<&CacheEntry>, duration_minutes: i64, now: DateTime<Utc>) -> bool {
    match entry {
        None => true,
        Some(entry) => now - entry.fetched_at > Duration::minutes(duration_minutes),
    }
}

pub async fn mark_success(
    pool: &Pool,
    source_id: i64,
    now: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<()> {
    db::mark_source_success(pool, source_id, now, duration_minutes).await
}

pub async fn mark_failure(pool: &Pool, source_id: i64) -> Result<()> {
    db::mark_source_failure(pool, source_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchStatus, Source, SourceType};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn entry(fetched_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            source_id: 1,
            fetched_at,
            expires_at: fetched_at + Duration::minutes(30),
        }
    }

    fn eligible(has_pro_subscriber: bool) -> EligibleSource {
        EligibleSource {
            source: Source {
                id: 1,
                source_type: SourceType::Website,
                url: "example.com".into(),
                canonical_key: "website:example.com".into(),
                name: "Example".into(),
                enabled: true,
                last_fetched_at: None,
                last_fetch_status: FetchStatus::Never,
            },
            cache_entry: None,
            has_pro_subscriber,
        }
    }

    #[test]
    fn missing_entry_is_stale() {
        assert!(is_stale(None, 30, now()));
    }

    #[test]
    fn fresh_until_duration_elapses() {
        assert!(!is_stale(Some(&entry(now())), 30, now()));
        assert!(!is_stale(Some(&entry(now() - Duration::minutes(30))), 30, now()));
        assert!(is_stale(Some(&entry(now() - Duration::minutes(31))), 30, now()));
    }

    #[test]
    fn free_and_pro_windows_differ() {
        let ten_ago = entry(now() - Duration::minutes(10));
        let thirty_one_ago = entry(now() - Duration::minutes(31));
        assert!(!is_stale(Some(&ten_ago), 30, now()));
        assert!(is_stale(Some(&thirty_one_ago), 30, now()));
        assert!(!is_stale(Some(&ten_ago), 15, now()));
        assert!(is_stale(Some(&entry(now() - Duration::minutes(16))), 15, now()));
    }

    #[test]
    fn any_pro_subscriber_selects_pro_duration() {
        let cache = config::Cache {
            free_minutes: 30,
            pro_minutes: 15,
        };
        assert_eq!(cache_duration_minutes(&eligible(true), &cache), 15);
        assert_eq!(cache_duration_minutes(&eligible(false), &cache), 30);
    }
}
