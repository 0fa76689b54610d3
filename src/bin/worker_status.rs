use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use std::path::PathBuf;

use ingest_worker::config;
use ingest_worker::db;
use ingest_worker::lock::LOCK_ID;

/// Sources not fetched within this many minutes count as stale in the snapshot.
const STATUS_STALE_MINUTES: i64 = 60;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the ingestion worker status snapshot as JSON")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let now = Utc::now();
    let status = db::worker_status(
        &pool,
        LOCK_ID,
        now - Duration::minutes(cfg.app.lock_stale_minutes),
        now - Duration::minutes(STATUS_STALE_MINUTES),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
