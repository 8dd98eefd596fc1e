use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mapvote::{CatalogCache, EventBus, VoteConfig};
use mapvote_server::service::INPUT_CHANNEL_CAPACITY;
use mapvote_server::transport::spawn_line_reader;
use mapvote_server::{
    build_router, spawn_audit_log, spawn_refresh, JsonLineSink, SteamWorkshopSource, VoteService,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (.toml or .json). Defaults plus environment when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the map history and catalog cache
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Workshop collection to fetch the catalog from
    #[arg(long)]
    collection_id: Option<String>,

    /// Append every vote lifecycle event to this file as JSON lines
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Skip the workshop fetch and run from the cached catalog
    #[arg(long)]
    offline: bool,
}

fn load_config(args: &Args) -> Result<VoteConfig> {
    let mut config = match &args.config {
        Some(path) => VoteConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => VoteConfig::from_env(),
    };
    if let Some(dir) = &args.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(id) = &args.collection_id {
        config.collection_id = id.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the transport
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "Failed to create state directory {}",
            config.state_dir.display()
        )
    })?;
    info!(
        server = %config.server_name,
        state_dir = %config.state_dir.display(),
        vote_round = config.vote_round,
        "Map vote server starting"
    );

    let bus = EventBus::new().shared();
    let audit = args
        .audit_log
        .clone()
        .map(|path| spawn_audit_log(&bus, path));

    let cache = CatalogCache::new(config.cache_path());
    let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);

    if args.offline {
        info!("Offline mode, using cached catalog only");
    } else if config.has_workshop_credentials() {
        spawn_refresh(SteamWorkshopSource::from_config(&config), tx.clone());
    } else {
        warn!("Steam API key or collection id missing, using cached catalog only");
    }

    spawn_line_reader(tokio::io::stdin(), tx);

    let router = build_router(config, bus);
    let mut service =
        VoteService::new(router, JsonLineSink::new(tokio::io::stdout())).with_cache(cache);
    let result = service.run(rx).await;

    // Last bus handle; the audit task drains and exits
    drop(service);
    if let Some(handle) = audit {
        if let Err(e) = handle.await {
            warn!(error = %e, "Audit log task panicked");
        }
    }
    result
}
