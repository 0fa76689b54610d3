use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

use ingest_worker::config;
use ingest_worker::db;
use ingest_worker::fetchers::FetcherRegistry;
use ingest_worker::refresh::{self, RefreshError};
use ingest_worker::worker::WorkerContext;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one ingestion cycle on behalf of a subscriber, subject to the hourly cap"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Subscriber external reference
    #[arg(long)]
    user: Option<String>,

    /// Only print the remaining allowance
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let user_id = match args.user.as_deref() {
        Some(external_ref) => db::find_user(&pool, external_ref).await?,
        None => None,
    };

    if args.check {
        let Some(user_id) = user_id else {
            return Ok(print_error(&RefreshError::Unauthorized));
        };
        let allowance =
            refresh::check_allowance(&pool, &cfg.limits, user_id, chrono::Utc::now()).await;
        return match allowance {
            Ok(allowance) => {
                println!("{}", serde_json::to_string_pretty(&allowance)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => Ok(print_error(&err)),
        };
    }

    let fetchers = FetcherRegistry::from_config(&cfg.fetchers)?;
    let ctx = WorkerContext::new(pool, fetchers, cfg);
    match refresh::trigger_manual_refresh(&ctx, user_id).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(print_error(&err)),
    }
}

fn print_error(err: &RefreshError) -> ExitCode {
    warn!(reason = err.reason_code(), "manual refresh refused");
    let mut body = json!({
        "error": err.to_string(),
        "reason": err.reason_code(),
    });
    if let RefreshError::RateLimited { limit, reset_at } = err {
        body["limit"] = json!(limit);
        body["resetAt"] = json!(reset_at);
    }
    println!("{}", body);
    ExitCode::FAILURE
}
