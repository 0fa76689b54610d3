use super::model::{EligibleSource, LatestFetched, WorkerStatus};
use crate::canonical;
use crate::model::{
    CacheEntry, FetchStatus, NormalizedItem, PlanTier, Post, Source, SourceType,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::instrument;

pub type Pool = SqlitePool;

/// SQLite caps bound parameters per statement; stay well below it.
const IN_CLAUSE_CHUNK: usize = 500;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask sqlx to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let type_str: String = row.get("source_type");
    let source_type = SourceType::parse_type(&type_str)
        .ok_or_else(|| anyhow!("unknown source type {}", type_str))?;
    let status_str: String = row.get("last_fetch_status");
    let last_fetch_status = FetchStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("unknown fetch status {}", status_str))?;
    Ok(Source {
        id: row.get("id"),
        source_type,
        url: row.get("url"),
        canonical_key: row.get("canonical_key"),
        name: row.get("name"),
        enabled: row.get("enabled"),
        last_fetched_at: row.try_get("last_fetched_at").ok().flatten(),
        last_fetch_status,
    })
}

fn cache_entry_from_row(row: &SqliteRow) -> Option<CacheEntry> {
    let fetched_at: Option<DateTime<Utc>> = row.try_get("cache_fetched_at").ok().flatten();
    let expires_at: Option<DateTime<Utc>> = row.try_get("cache_expires_at").ok().flatten();
    match (fetched_at, expires_at) {
        (Some(fetched_at), Some(expires_at)) => Some(CacheEntry {
            source_id: row.get("id"),
            fetched_at,
            expires_at,
        }),
        _ => None,
    }
}

/// Source, cache entry and a `has_pro` flag. `pro_filter` narrows which pro
/// subscriptions count; it is appended inside the `EXISTS` subquery.
fn eligible_select(pro_filter: &str) -> String {
    format!(
        "SELECT s.id, s.source_type, s.url, s.canonical_key, s.name, s.enabled, \
                s.last_fetched_at, s.last_fetch_status, \
                c.fetched_at AS cache_fetched_at, c.expires_at AS cache_expires_at, \
                EXISTS (SELECT 1 FROM user_sources us JOIN users u ON u.id = us.user_id \
                        WHERE us.source_id = s.id AND u.plan = 'pro'{pro_filter}) AS has_pro \
         FROM sources s \
         LEFT JOIN cache_entries c ON c.source_id = s.id "
    )
}

const UNMUTED_ONLY: &str =
    " AND (us.muted_until IS NULL OR julianday(us.muted_until) < julianday(?))";

fn eligible_from_row(row: &SqliteRow) -> Result<EligibleSource> {
    Ok(EligibleSource {
        source: source_from_row(row)?,
        cache_entry: cache_entry_from_row(row),
        has_pro_subscriber: row.get::<bool, _>("has_pro"),
    })
}

// ---------------------------------------------------------------------------
// Subscribers and subscriptions
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, external_ref: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE external_ref = ?")
        .bind(external_ref)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_or_create_user(pool: &Pool, external_ref: &str, plan: PlanTier) -> Result<i64> {
    if let Some(id) = find_user(pool, external_ref).await? {
        return Ok(id);
    }

    let rec = sqlx::query("INSERT INTO users (external_ref, plan) VALUES (?, ?) RETURNING id")
        .bind(external_ref)
        .bind(plan.as_str())
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn user_plan(pool: &Pool, user_id: i64) -> Result<Option<PlanTier>> {
    let plan: Option<String> = sqlx::query_scalar("SELECT plan FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(plan.map(|p| PlanTier::parse_plan(&p)))
}

#[instrument(skip_all)]
pub async fn set_user_plan(pool: &Pool, user_id: i64, plan: PlanTier) -> Result<()> {
    sqlx::query("UPDATE users SET plan = ? WHERE id = ?")
        .bind(plan.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Subscribe a user to a source, creating the source the first time its
/// canonical key is seen. Re-subscribing is a no-op. Returns the source id.
#[instrument(skip_all, fields(source_type = source_type.as_str()))]
pub async fn subscribe(
    pool: &Pool,
    user_id: i64,
    source_type: SourceType,
    raw_url: &str,
    name: &str,
) -> Result<i64> {
    let key = canonical::canonical_key(source_type, raw_url)
        .with_context(|| format!("cannot subscribe to {:?}", raw_url))?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO sources (source_type, url, canonical_key, name) VALUES (?, ?, ?, ?) \
         ON CONFLICT(canonical_key) DO NOTHING",
    )
    .bind(source_type.as_str())
    .bind(raw_url.trim())
    .bind(&key)
    .bind(name)
    .execute(&mut *tx)
    .await?;
    let source_id: i64 = sqlx::query_scalar("SELECT id FROM sources WHERE canonical_key = ?")
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO user_sources (user_id, source_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(source_id)
}

#[instrument(skip_all)]
pub async fn mute_subscription(
    pool: &Pool,
    user_id: i64,
    source_id: i64,
    until: Option<DateTime<Utc>>,
) -> Result<()> {
    let res = sqlx::query("UPDATE user_sources SET muted_until = ? WHERE user_id = ? AND source_id = ?")
        .bind(until)
        .bind(user_id)
        .bind(source_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("user {} is not subscribed to source {}", user_id, source_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_source_enabled(pool: &Pool, source_id: i64, enabled: bool) -> Result<()> {
    sqlx::query("UPDATE sources SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sources, eligibility and freshness
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn get_source(pool: &Pool, source_id: i64) -> Result<Option<Source>> {
    let row = sqlx::query(
        "SELECT id, source_type, url, canonical_key, name, enabled, last_fetched_at, last_fetch_status \
         FROM sources WHERE id = ?",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(source_from_row).transpose()
}

/// Enabled sources with at least one subscriber whose mute has lapsed (or who
/// never muted), each with its cache entry and pro-subscriber flag.
#[instrument(skip_all)]
pub async fn watched_sources(pool: &Pool, now: DateTime<Utc>) -> Result<Vec<EligibleSource>> {
    let sql = format!(
        "{} \
         WHERE s.enabled = 1 \
           AND EXISTS (SELECT 1 FROM user_sources us WHERE us.source_id = s.id \
                       AND (us.muted_until IS NULL OR julianday(us.muted_until) < julianday(?))) \
         ORDER BY s.id",
        eligible_select(UNMUTED_ONLY)
    );
    let rows = sqlx::query(&sql)
        .bind(now)
        .bind(now)
        .fetch_all(pool)
        .await?;
    rows.iter().map(eligible_from_row).collect()
}

/// A single source with its cache entry, regardless of enabled/mute state.
/// Every pro subscriber counts here, muted or not.
#[instrument(skip_all)]
pub async fn source_for_fetch(pool: &Pool, source_id: i64) -> Result<Option<EligibleSource>> {
    let sql = format!("{} WHERE s.id = ?", eligible_select(""));
    let row = sqlx::query(&sql)
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(eligible_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn cache_entry(pool: &Pool, source_id: i64) -> Result<Option<CacheEntry>> {
    let row = sqlx::query("SELECT source_id, fetched_at, expires_at FROM cache_entries WHERE source_id = ?")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| CacheEntry {
        source_id: row.get("source_id"),
        fetched_at: row.get("fetched_at"),
        expires_at: row.get("expires_at"),
    }))
}

/// Record a successful fetch: source status plus cache entry upsert, atomically.
#[instrument(skip_all)]
pub async fn mark_source_success(
    pool: &Pool,
    source_id: i64,
    now: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<()> {
    let expires_at = now + Duration::minutes(duration_minutes);
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE sources SET last_fetched_at = ?, last_fetch_status = ? WHERE id = ?")
        .bind(now)
        .bind(FetchStatus::Success.as_str())
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO cache_entries (source_id, fetched_at, expires_at) VALUES (?, ?, ?) \
         ON CONFLICT(source_id) DO UPDATE SET fetched_at = excluded.fetched_at, expires_at = excluded.expires_at",
    )
    .bind(source_id)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Record a failed fetch. The cache entry is left alone so the source stays due.
#[instrument(skip_all)]
pub async fn mark_source_failure(pool: &Pool, source_id: i64) -> Result<()> {
    sqlx::query("UPDATE sources SET last_fetch_status = ? WHERE id = ?")
        .bind(FetchStatus::Failed.as_str())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

/// External ids from `candidates` already stored for this source.
#[instrument(skip_all)]
pub async fn existing_external_ids(
    pool: &Pool,
    source_id: i64,
    candidates: &[&str],
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in candidates.chunks(IN_CLAUSE_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT external_id FROM posts WHERE source_id = ");
        qb.push_bind(source_id);
        qb.push(" AND external_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let ids: Vec<String> = qb.build_query_scalar().fetch_all(pool).await?;
        found.extend(ids);
    }
    Ok(found)
}

/// Insert posts for a source. Rows colliding on (source_id, external_id) are
/// skipped by the unique index and not counted. Returns rows inserted.
#[instrument(skip_all, fields(source_id = source_id, candidates = items.len()))]
pub async fn insert_posts(
    pool: &Pool,
    source_id: i64,
    items: &[&NormalizedItem],
    fetched_at: DateTime<Utc>,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for normalized in items {
        let item = &normalized.item;
        let metadata = if item.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&item.metadata).context("failed to serialize post metadata")?)
        };
        let res = sqlx::query(
            "INSERT INTO posts (source_id, external_id, title, content, author, url, image_url, \
                                media_type, category, metadata, published_at, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(source_id, external_id) DO NOTHING",
        )
        .bind(source_id)
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.author)
        .bind(&item.url)
        .bind(&item.image_url)
        .bind(item.media_kind.as_str())
        .bind(normalized.category)
        .bind(metadata)
        .bind(item.published_at)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;
        inserted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn posts_for_source(pool: &Pool, source_id: i64) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        "SELECT id, source_id, external_id, title, content, author, url, image_url, media_type, \
                category, metadata, published_at, fetched_at \
         FROM posts WHERE source_id = ? ORDER BY julianday(published_at) DESC, id DESC",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    let posts = rows
        .into_iter()
        .map(|row| Post {
            id: row.get("id"),
            source_id: row.get("source_id"),
            external_id: row.get("external_id"),
            title: row.get("title"),
            content: row.get("content"),
            author: row.get("author"),
            url: row.get("url"),
            image_url: row.get("image_url"),
            media_type: row.get("media_type"),
            category: row.get("category"),
            metadata: row.get("metadata"),
            published_at: row.get("published_at"),
            fetched_at: row.get("fetched_at"),
        })
        .collect();
    Ok(posts)
}

// ---------------------------------------------------------------------------
// Worker lock
// ---------------------------------------------------------------------------

/// Take the lock row if it is absent or older than `stale_before`, in a single
/// statement so two processes cannot both observe it free. Returns whether
/// this caller now holds it.
#[instrument(skip_all)]
pub async fn try_acquire_lock(
    pool: &Pool,
    lock_id: &str,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO worker_lock (id, locked_at) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET locked_at = excluded.locked_at \
         WHERE julianday(worker_lock.locked_at) < julianday(?)",
    )
    .bind(lock_id)
    .bind(now)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn lock_locked_at(pool: &Pool, lock_id: &str) -> Result<Option<DateTime<Utc>>> {
    let locked_at = sqlx::query_scalar("SELECT locked_at FROM worker_lock WHERE id = ?")
        .bind(lock_id)
        .fetch_optional(pool)
        .await?;
    Ok(locked_at)
}

#[instrument(skip_all)]
pub async fn release_lock(pool: &Pool, lock_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM worker_lock WHERE id = ?")
        .bind(lock_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Manual refresh events
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn count_manual_refreshes_since(
    pool: &Pool,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM manual_refresh_events \
         WHERE user_id = ? AND julianday(created_at) >= julianday(?)",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn oldest_manual_refresh_since(
    pool: &Pool,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let oldest = sqlx::query_scalar(
        "SELECT created_at FROM manual_refresh_events \
         WHERE user_id = ? AND julianday(created_at) >= julianday(?) \
         ORDER BY julianday(created_at) ASC LIMIT 1",
    )
    .bind(user_id)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(oldest)
}

/// Append one refresh event and drop this user's events older than `prune_before`.
#[instrument(skip_all)]
pub async fn record_manual_refresh(
    pool: &Pool,
    user_id: i64,
    at: DateTime<Utc>,
    prune_before: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO manual_refresh_events (user_id, created_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "DELETE FROM manual_refresh_events WHERE user_id = ? AND julianday(created_at) < julianday(?)",
    )
    .bind(user_id)
    .bind(prune_before)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn worker_status(
    pool: &Pool,
    lock_id: &str,
    lock_stale_before: DateTime<Utc>,
    source_stale_before: DateTime<Utc>,
) -> Result<WorkerStatus> {
    let locked_at = lock_locked_at(pool, lock_id).await?;
    let lock_active = locked_at.is_some_and(|at| at >= lock_stale_before);

    let total_sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE enabled = 1")
        .fetch_one(pool)
        .await?;
    let stale_sources: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sources WHERE enabled = 1 \
         AND (last_fetched_at IS NULL OR julianday(last_fetched_at) < julianday(?))",
    )
    .bind(source_stale_before)
    .fetch_one(pool)
    .await?;
    let failed_sources: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sources WHERE enabled = 1 AND last_fetch_status = 'failed'",
    )
    .fetch_one(pool)
    .await?;

    let latest = sqlx::query(
        "SELECT id, name, last_fetched_at, last_fetch_status FROM sources \
         WHERE enabled = 1 AND last_fetched_at IS NOT NULL \
         ORDER BY julianday(last_fetched_at) DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let latest_fetched = match latest {
        Some(row) => {
            let status: String = row.get("last_fetch_status");
            Some(LatestFetched {
                id: row.get("id"),
                name: row.get("name"),
                last_fetched_at: row.get("last_fetched_at"),
                last_fetch_status: FetchStatus::parse_status(&status)
                    .ok_or_else(|| anyhow!("unknown fetch status {}", status))?,
            })
        }
        None => None,
    };

    Ok(WorkerStatus {
        lock_active,
        locked_at,
        total_sources,
        stale_sources,
        failed_sources,
        latest_fetched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchedItem, MediaKind};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn item(external_id: &str) -> NormalizedItem {
        NormalizedItem {
            item: FetchedItem {
                external_id: external_id.into(),
                title: Some("t".into()),
                content: "<p>body</p>".into(),
                author: None,
                url: None,
                image_url: None,
                media_kind: MediaKind::Text,
                metadata: serde_json::Map::new(),
                published_at: Utc::now(),
            },
            category: "Uncategorized",
        }
    }

    #[test]
    fn sqlite_url_gets_create_mode() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite://relative/ingest.db"),
            "sqlite://relative/ingest.db?mode=rwc"
        );
        assert_eq!(
            prepare_sqlite_url("sqlite://relative/ingest.db?mode=ro"),
            "sqlite://relative/ingest.db?mode=ro"
        );
    }

    #[tokio::test]
    async fn subscribe_shares_source_across_spellings() {
        let pool = setup_pool().await;
        let alice = get_or_create_user(&pool, "alice", PlanTier::Free).await.unwrap();
        let bob = get_or_create_user(&pool, "bob", PlanTier::Pro).await.unwrap();

        let s1 = subscribe(&pool, alice, SourceType::X, "https://x.com/RustLang", "Rust")
            .await
            .unwrap();
        let s2 = subscribe(&pool, bob, SourceType::X, "@rustlang", "Rust Lang")
            .await
            .unwrap();
        assert_eq!(s1, s2);
        // idempotent re-subscribe
        subscribe(&pool, alice, SourceType::X, "@rustlang", "Rust").await.unwrap();

        let source = get_source(&pool, s1).await.unwrap().unwrap();
        assert_eq!(source.canonical_key, "x:rustlang");
        assert_eq!(source.last_fetch_status, FetchStatus::Never);
        assert!(source.last_fetched_at.is_none());

        let watched = watched_sources(&pool, Utc::now()).await.unwrap();
        assert_eq!(watched.len(), 1);
        assert!(watched[0].has_pro_subscriber);
        assert!(watched[0].cache_entry.is_none());
    }

    #[tokio::test]
    async fn insert_posts_skips_duplicates() {
        let pool = setup_pool().await;
        let uid = get_or_create_user(&pool, "u", PlanTier::Free).await.unwrap();
        let sid = subscribe(&pool, uid, SourceType::Website, "example.com", "Example")
            .await
            .unwrap();

        let a = item("a");
        let b = item("b");
        let inserted = insert_posts(&pool, sid, &[&a, &b], Utc::now()).await.unwrap();
        assert_eq!(inserted, 2);

        let again = insert_posts(&pool, sid, &[&a, &item("c")], Utc::now()).await.unwrap();
        assert_eq!(again, 1);

        let existing = existing_external_ids(&pool, sid, &["a", "c", "zzz"]).await.unwrap();
        assert_eq!(existing.len(), 2);
        assert!(existing.contains("a") && existing.contains("c"));
        assert_eq!(posts_for_source(&pool, sid).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn forced_fetch_counts_muted_pro_subscribers() {
        let pool = setup_pool().await;
        let free = get_or_create_user(&pool, "free", PlanTier::Free).await.unwrap();
        let pro = get_or_create_user(&pool, "pro", PlanTier::Pro).await.unwrap();
        let sid = subscribe(&pool, free, SourceType::Website, "example.com", "Example")
            .await
            .unwrap();
        subscribe(&pool, pro, SourceType::Website, "example.com", "Example")
            .await
            .unwrap();
        mute_subscription(&pool, pro, sid, Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let watched = watched_sources(&pool, Utc::now()).await.unwrap();
        assert_eq!(watched.len(), 1);
        assert!(!watched[0].has_pro_subscriber);

        let forced = source_for_fetch(&pool, sid).await.unwrap().unwrap();
        assert!(forced.has_pro_subscriber);
        assert!(source_for_fetch(&pool, sid + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_row_upsert_respects_staleness() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let stale_before = now - Duration::minutes(30);

        assert!(try_acquire_lock(&pool, "w", now, stale_before).await.unwrap());
        assert!(!try_acquire_lock(&pool, "w", now, stale_before).await.unwrap());

        // 31 minutes later the first holder counts as abandoned
        let later = now + Duration::minutes(31);
        assert!(try_acquire_lock(&pool, "w", later, later - Duration::minutes(30))
            .await
            .unwrap());
        assert_eq!(lock_locked_at(&pool, "w").await.unwrap(), Some(later));

        release_lock(&pool, "w").await.unwrap();
        assert!(lock_locked_at(&pool, "w").await.unwrap().is_none());
    }
}
