//! Subscriber-initiated refreshes, capped per plan tier over a rolling hour.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::Limits;
use crate::db::{self, Pool};
use crate::model::{CycleReport, PlanTier};
use crate::worker::{run_cycle, WorkerContext};

const WINDOW_MINUTES: i64 = 60;
const RETENTION_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("manual refresh limit of {limit} per hour reached")]
    RateLimited {
        limit: i64,
        reset_at: Option<DateTime<Utc>>,
    },
    #[error("refresh failed: {0:#}")]
    Failed(#[from] anyhow::Error),
}

impl RefreshError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RefreshError::Unauthorized => "UNAUTHORIZED",
            RefreshError::RateLimited { .. } => "MANUAL_REFRESH_LIMIT_REACHED",
            RefreshError::Failed(_) => "FETCH_FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RefreshAllowance {
    pub plan: PlanTier,
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    /// When the oldest event inside the window ages out.
    pub reset_at: Option<DateTime<Utc>>,
}

/// How many manual refreshes `user_id` has left in the current rolling hour.
/// Unknown subscribers are unauthorized.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn check_allowance(
    pool: &Pool,
    limits: &Limits,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<RefreshAllowance, RefreshError> {
    let plan = db::user_plan(pool, user_id)
        .await?
        .ok_or(RefreshError::Unauthorized)?;
    let window_start = now - Duration::minutes(WINDOW_MINUTES);
    let limit = limits.manual_refresh_cap(plan);
    let used = db::count_manual_refreshes_since(pool, user_id, window_start).await?;
    let reset_at = db::oldest_manual_refresh_since(pool, user_id, window_start)
        .await?
        .map(|oldest| oldest + Duration::minutes(WINDOW_MINUTES));
    Ok(RefreshAllowance {
        plan,
        limit,
        used,
        remaining: (limit - used).max(0),
        reset_at,
    })
}

/// Run one cycle on behalf of a subscriber. The event is recorded only once
/// the cycle has completed.
#[instrument(skip_all)]
pub async fn trigger_manual_refresh(
    ctx: &WorkerContext,
    user_id: Option<i64>,
) -> Result<CycleReport, RefreshError> {
    let user_id = user_id.ok_or(RefreshError::Unauthorized)?;
    let now = Utc::now();
    let allowance = check_allowance(&ctx.pool, &ctx.cfg.limits, user_id, now).await?;
    if allowance.remaining == 0 {
        info!(user_id, limit = allowance.limit, "manual refresh rejected: limit reached");
        return Err(RefreshError::RateLimited {
            limit: allowance.limit,
            reset_at: allowance.reset_at,
        });
    }

    let report = run_cycle(ctx).await?;
    let recorded_at = Utc::now();
    db::record_manual_refresh(
        &ctx.pool,
        user_id,
        recorded_at,
        recorded_at - Duration::hours(RETENTION_HOURS),
    )
    .await?;
    info!(
        user_id,
        remaining = allowance.remaining - 1,
        skipped = report.skipped,
        new_posts = report.new_posts,
        "manual refresh complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(RefreshError::Unauthorized.reason_code(), "UNAUTHORIZED");
        assert_eq!(
            RefreshError::RateLimited {
                limit: 5,
                reset_at: None
            }
            .reason_code(),
            "MANUAL_REFRESH_LIMIT_REACHED"
        );
        assert_eq!(
            RefreshError::Failed(anyhow::anyhow!("boom")).reason_code(),
            "FETCH_FAILED"
        );
    }
}
