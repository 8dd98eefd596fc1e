//! Single-owner event loop
//!
//! ```text
//!   stdin reader ──┐
//!                  ├──► mpsc ──► VoteService ──► EventRouter ──► JsonLineSink (stdout)
//!   catalog fetch ─┘                 ▲
//!                                    └── sleep until next timer deadline
//! ```
//!
//! Every mutation of the vote core happens inside [`VoteService::run`], one
//! input at a time.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use mapvote::{
    CatalogCache, EventBus, EventRouter, MapCatalog, MapEntry, ProcessContext, RecentMaps,
    SharedEventBus, VoteConfig, VoteMachine,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::transport::{Inbound, JsonLineSink};

/// Channel capacity for inputs into the service loop
pub const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Everything the loop reacts to besides timers
#[derive(Debug)]
pub enum ServiceInput {
    Inbound(Inbound),
    CatalogUpdated(Vec<MapEntry>),
}

pub struct VoteService<W> {
    router: EventRouter,
    sink: JsonLineSink<W>,
    cache: Option<CatalogCache>,
}

impl<W: AsyncWrite + Unpin> VoteService<W> {
    pub fn new(router: EventRouter, sink: JsonLineSink<W>) -> Self {
        Self {
            router,
            sink,
            cache: None,
        }
    }

    /// Persist fetched catalogs to `cache`
    pub fn with_cache(mut self, cache: CatalogCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn sink(&self) -> &JsonLineSink<W> {
        &self.sink
    }

    /// Process inputs and timer deadlines until every sender is dropped
    pub async fn run(&mut self, mut rx: mpsc::Receiver<ServiceInput>) -> Result<()> {
        info!("Vote service started");
        loop {
            let deadline = self.router.next_deadline();
            tokio::select! {
                input = rx.recv() => match input {
                    Some(input) => self.handle(input, Instant::now()),
                    None => break,
                },
                _ = wait_for(deadline) => {
                    // The sleep only completes with a deadline armed
                    let now = deadline.map_or_else(Instant::now, |d| Instant::now().max(d));
                    self.router.on_timer(now);
                }
            }
            self.flush().await?;
        }
        info!("Vote service stopped");
        Ok(())
    }

    /// Handle one input without flushing
    pub fn handle(&mut self, input: ServiceInput, now: Instant) {
        match input {
            ServiceInput::Inbound(inbound) => {
                if let Some(disposition) = inbound.apply(&mut self.router, now) {
                    debug!(?disposition, "Chat routed");
                }
            }
            ServiceInput::CatalogUpdated(maps) => self.update_catalog(maps),
        }
    }

    fn update_catalog(&mut self, maps: Vec<MapEntry>) {
        if maps.is_empty() {
            warn!("Ignoring empty catalog update");
            return;
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&maps) {
                warn!(error = %e, path = %cache.path().display(), "Failed to save map cache");
            }
        }
        self.router
            .machine_mut()
            .replace_catalog(MapCatalog::new(maps).shared());
    }

    async fn flush(&mut self) -> Result<()> {
        let effects = self.router.drain_outbound();
        self.sink
            .send(&effects)
            .await
            .context("Failed to write transport output")
    }
}

/// Assemble the vote core from `config`: the cached catalog (if any), the
/// recent-maps history under `state_dir`, and the lifecycle bus.
pub fn build_router(config: VoteConfig, bus: SharedEventBus) -> EventRouter {
    let cache = CatalogCache::new(config.cache_path());
    let catalog = match cache.load() {
        Ok(Some(maps)) => {
            info!(maps = maps.len(), path = %cache.path().display(), "Loaded cached catalog");
            MapCatalog::new(maps)
        }
        Ok(None) => MapCatalog::empty(),
        Err(e) => {
            warn!(error = %e, path = %cache.path().display(), "Ignoring unreadable map cache");
            MapCatalog::empty()
        }
    };
    let history = RecentMaps::load(config.history_path(), config.recent_maps_count);
    let machine = VoteMachine::new(
        config,
        ProcessContext::new().shared(),
        catalog.shared(),
        Box::new(history),
    )
    .with_event_bus(bus);
    EventRouter::new(machine)
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Append every lifecycle event on `bus` to `path` as JSON lines. A failure
/// is logged before the task ends.
pub fn spawn_audit_log(bus: &EventBus, path: PathBuf) -> tokio::task::JoinHandle<Result<()>> {
    let rx = bus.subscribe();
    tokio::spawn(async move {
        let result = write_audit_log(rx, &path).await;
        if let Err(e) = &result {
            error!(error = %format!("{e:#}"), path = %path.display(), "Audit log stopped");
        }
        result
    })
}

async fn write_audit_log(
    mut rx: broadcast::Receiver<mapvote::VoteEvent>,
    path: &std::path::Path,
) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open audit log {}", path.display()))?;

    loop {
        match rx.recv().await {
            Ok(event) => {
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                file.write_all(line.as_bytes())
                    .await
                    .context("Failed to write audit log")?;
                file.flush().await.context("Failed to flush audit log")?;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Audit log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}
