//! Cycle orchestration: lock, select stale sources, fan out one pipeline per
//! source, fan in, report, unlock.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::eligibility;
use crate::fetchers::{Fetcher, FetcherRegistry};
use crate::freshness;
use crate::lock::CycleLock;
use crate::model::{CycleReport, FetchedItem, NormalizedItem, SkipReason, Source};
use crate::normalize::normalize_items;

/// Everything a cycle needs. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: Pool,
    pub fetchers: Arc<FetcherRegistry>,
    pub cfg: Arc<Config>,
}

impl WorkerContext {
    pub fn new(pool: Pool, fetchers: FetcherRegistry, cfg: Config) -> Self {
        Self {
            pool,
            fetchers: Arc::new(fetchers),
            cfg: Arc::new(cfg),
        }
    }

    fn cycle_lock(&self) -> CycleLock {
        CycleLock::new(self.pool.clone(), self.cfg.app.lock_stale_minutes)
    }
}

/// Outcome of one source's fetch/normalize/persist pipeline.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SourceFetchReport {
    pub source_id: i64,
    /// Items returned by the fetcher, before normalization.
    pub fetched: usize,
    pub inserted: u64,
}

/// Run one ingestion cycle. Both the scheduler and the manual trigger call
/// this; the lock is released on every path out.
#[instrument(skip_all)]
pub async fn run_cycle(ctx: &WorkerContext) -> Result<CycleReport> {
    let now = Utc::now();
    let lock = ctx.cycle_lock();
    if !lock.acquire(now).await? {
        info!("cycle skipped: lock active");
        return Ok(CycleReport::skipped(SkipReason::LockActive));
    }

    match run_locked(ctx, now).await {
        Ok(report) => {
            lock.release().await.context("failed to release cycle lock")?;
            Ok(report)
        }
        Err(err) => {
            lock.release_quietly().await;
            Err(err)
        }
    }
}

async fn run_locked(ctx: &WorkerContext, now: DateTime<Utc>) -> Result<CycleReport> {
    let selection = eligibility::select_stale(&ctx.pool, &ctx.cfg, now).await?;
    let total_sources = selection.total;
    if selection.stale.is_empty() {
        info!(total_sources, "cycle skipped: no stale sources");
        return Ok(CycleReport {
            total_sources,
            ..CycleReport::skipped(SkipReason::NoStaleSources)
        });
    }
    let stale_sources = selection.stale.len();

    let handles: Vec<(i64, JoinHandle<Result<SourceFetchReport>>)> = selection
        .stale
        .into_iter()
        .map(|(eligible, minutes)| {
            let ctx = ctx.clone();
            let source_id = eligible.source.id;
            let handle = tokio::spawn(async move {
                process_source(&ctx, &eligible.source, minutes).await
            });
            (source_id, handle)
        })
        .collect();

    let outcomes = join_all(
        handles
            .into_iter()
            .map(|(source_id, handle)| async move { (source_id, handle.await) }),
    )
    .await;

    let mut report = CycleReport {
        total_sources,
        stale_sources,
        ..Default::default()
    };
    for (source_id, outcome) in outcomes {
        match outcome {
            Ok(Ok(source_report)) => {
                report.fetched_sources += 1;
                report.new_posts += source_report.inserted;
            }
            Ok(Err(err)) => {
                report.failed_sources += 1;
                warn!(source_id, error = %format!("{:#}", err), "source fetch failed");
            }
            Err(join_err) => {
                report.failed_sources += 1;
                warn!(source_id, error = %join_err, "source pipeline aborted");
                record_failure(ctx, source_id).await;
            }
        }
    }

    info!(
        total = report.total_sources,
        stale = report.stale_sources,
        fetched = report.fetched_sources,
        failed = report.failed_sources,
        new_posts = report.new_posts,
        "cycle complete"
    );
    Ok(report)
}

/// Fetch one source right away, ignoring freshness, lock and mute state.
#[instrument(skip_all, fields(source_id = source_id))]
pub async fn fetch_source_now(ctx: &WorkerContext, source_id: i64) -> Result<SourceFetchReport> {
    let eligible = db::source_for_fetch(&ctx.pool, source_id)
        .await?
        .ok_or_else(|| anyhow!("source {} not found", source_id))?;
    let minutes = freshness::cache_duration_minutes(&eligible, &ctx.cfg.cache);
    process_source(ctx, &eligible.source, minutes).await
}

/// Fetch, normalize and persist one source, then record the outcome.
async fn process_source(
    ctx: &WorkerContext,
    source: &Source,
    cache_minutes: i64,
) -> Result<SourceFetchReport> {
    match run_pipeline(ctx, source).await {
        Ok(report) => {
            if let Err(err) =
                freshness::mark_success(&ctx.pool, source.id, Utc::now(), cache_minutes).await
            {
                record_failure(ctx, source.id).await;
                return Err(err);
            }
            debug!(
                source_id = source.id,
                fetched = report.fetched,
                inserted = report.inserted,
                "source fetched"
            );
            Ok(report)
        }
        Err(err) => {
            record_failure(ctx, source.id).await;
            Err(err)
        }
    }
}

async fn record_failure(ctx: &WorkerContext, source_id: i64) {
    if let Err(err) = freshness::mark_failure(&ctx.pool, source_id).await {
        warn!(source_id, ?err, "failed to record source failure");
    }
}

async fn run_pipeline(ctx: &WorkerContext, source: &Source) -> Result<SourceFetchReport> {
    let fetcher = ctx
        .fetchers
        .get(source.source_type)
        .ok_or_else(|| anyhow!("no fetcher registered for {}", source.source_type.as_str()))?;
    let since = source.last_fetched_at.unwrap_or(ctx.cfg.content.start_date);

    let items = fetch_with_retry(fetcher.as_ref(), source, since, ctx.cfg.app.fetch_timeout()).await?;
    let fetched = items.len();
    let inserted = persist_items(&ctx.pool, &ctx.cfg, source.id, items).await?;
    Ok(SourceFetchReport {
        source_id: source.id,
        fetched,
        inserted,
    })
}

/// One attempt plus exactly one retry, each bounded by `timeout`.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    source: &Source,
    since: DateTime<Utc>,
    timeout: Duration,
) -> Result<Vec<FetchedItem>> {
    match fetch_once(fetcher, source, since, timeout).await {
        Ok(items) => Ok(items),
        Err(first) => {
            debug!(source_id = source.id, error = %first, "fetch attempt failed, retrying");
            fetch_once(fetcher, source, since, timeout)
                .await
                .with_context(|| format!("fetch failed twice for source {}", source.id))
        }
    }
}

async fn fetch_once(
    fetcher: &dyn Fetcher,
    source: &Source,
    since: DateTime<Utc>,
    timeout: Duration,
) -> Result<Vec<FetchedItem>> {
    match tokio::time::timeout(timeout, fetcher.fetch(source, since)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("fetch timed out after {}ms", timeout.as_millis())),
    }
}

/// Normalize, drop ids already stored for the source (or repeated within the
/// batch), insert the rest. Returns rows inserted.
pub async fn persist_items(
    pool: &Pool,
    cfg: &Config,
    source_id: i64,
    items: Vec<FetchedItem>,
) -> Result<u64> {
    let normalized = normalize_items(items, cfg.content.start_date, cfg.content.max_bytes);
    if normalized.is_empty() {
        return Ok(0);
    }

    let candidates: Vec<&str> = normalized
        .iter()
        .map(|n| n.item.external_id.as_str())
        .collect();
    let existing = db::existing_external_ids(pool, source_id, &candidates).await?;

    let mut seen = HashSet::new();
    let fresh: Vec<&NormalizedItem> = normalized
        .iter()
        .filter(|n| {
            let id = n.item.external_id.as_str();
            !existing.contains(id) && seen.insert(id)
        })
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }
    db::insert_posts(pool, source_id, &fresh, Utc::now()).await
}

/// Run a cycle every `interval`, starting immediately. Failed cycles are
/// logged and the loop carries on.
pub fn spawn_scheduler(ctx: WorkerContext, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_cycle(&ctx).await {
                Ok(report) => debug!(?report, "scheduled cycle finished"),
                Err(err) => error!(?err, "scheduled cycle failed"),
            }
        }
    })
}
