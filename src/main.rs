use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use ingest_worker::config;
use ingest_worker::db;
use ingest_worker::fetchers::FetcherRegistry;
use ingest_worker::worker::{self, WorkerContext};

#[derive(Debug, Parser)]
#[command(author, version, about = "Periodically fetch all watched sources into the post store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single cycle, print its report and exit
    #[arg(long)]
    once: bool,
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
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let fetchers = FetcherRegistry::from_config(&cfg.fetchers)?;
    let interval = cfg.app.cycle_interval();
    let ctx = WorkerContext::new(pool, fetchers, cfg);

    if args.once {
        let report = worker::run_cycle(&ctx).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(interval_secs = interval.as_secs(), "starting ingestion scheduler");
    let scheduler = worker::spawn_scheduler(ctx, interval);
    tokio::select! {
        res = scheduler => {
            if let Err(err) = res {
                error!(?err, "scheduler task ended unexpectedly");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }
    Ok(())
}
