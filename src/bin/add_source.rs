use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use ingest_worker::config;
use ingest_worker::db;
use ingest_worker::fetchers::FetcherRegistry;
use ingest_worker::model::{PlanTier, SourceType};
use ingest_worker::worker::{self, WorkerContext};

#[derive(Debug, Parser)]
#[command(author, version, about = "Subscribe a subscriber to a source by URL or handle")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Subscriber external reference; created on first use
    #[arg(long)]
    user: String,

    /// Plan for a newly created subscriber, or to switch an existing one to
    #[arg(long)]
    plan: Option<String>,

    /// Source type: x, youtube, substack, telegram, website
    #[arg(long = "type")]
    source_type: String,

    /// Raw URL or handle
    #[arg(long)]
    url: String,

    /// Display name (defaults to the URL)
    #[arg(long)]
    name: Option<String>,

    /// Mute the subscription for this many minutes
    #[arg(long)]
    mute_minutes: Option<i64>,

    /// Fetch the source immediately after subscribing
    #[arg(long)]
    fetch: bool,
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

    let source_type = SourceType::parse_type(&args.source_type)
        .ok_or_else(|| anyhow!("unknown source type {:?}", args.source_type))?;
    let plan = args.plan.as_deref().map(PlanTier::parse_plan);

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let user_id = db::get_or_create_user(&pool, &args.user, plan.unwrap_or_default()).await?;
    if let Some(plan) = plan {
        db::set_user_plan(&pool, user_id, plan).await?;
    }

    let name = args.name.clone().unwrap_or_else(|| args.url.trim().to_string());
    let source_id = db::subscribe(&pool, user_id, source_type, &args.url, &name).await?;
    if let Some(minutes) = args.mute_minutes {
        let until = Utc::now() + Duration::minutes(minutes);
        db::mute_subscription(&pool, user_id, source_id, Some(until)).await?;
    }
    info!(user_id, source_id, source_type = source_type.as_str(), "subscribed");

    if let Some(source) = db::get_source(&pool, source_id).await? {
        println!("{}", serde_json::to_string_pretty(&source)?);
    }

    if args.fetch {
        let fetchers = FetcherRegistry::from_config(&cfg.fetchers)?;
        let ctx = WorkerContext::new(pool, fetchers, cfg);
        let report = worker::fetch_source_now(&ctx, source_id).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
