//! Tile replay tool.
//!
//! Replays a recorded sequence of tiling-framework events against an
//! aggregation layer backed by on-disk geotile responses, with:
//! - Wrapped-tile deduplication through the shared tile cache
//! - Concurrent loads bounded by the cache's fetch limit
//! - Structured logging of renders, probes and cache notifications

mod player;
mod script;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tile_cache::{
    AggregationLayer, BucketTile, CacheConfig, CacheObserver, ChannelObserver, DirectorySource,
    GeotileTransform, TileCacheService, TileRenderer,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use player::{log_events, LoggingRenderer, Replayer};
use script::ReplayScript;

#[derive(Parser, Debug)]
#[command(name = "tile-replay")]
#[command(about = "Replay tile load/unload traces against an aggregation layer")]
struct Args {
    /// Replay script (YAML)
    #[arg(long, env = "REPLAY_SCRIPT")]
    script: PathBuf,

    /// Directory of aggregation responses, laid out as {z}/{x}/{y}.json
    #[arg(long, env = "TILE_DATA_DIR", default_value = "data/tiles")]
    data_dir: PathBuf,

    /// Cache configuration file (defaults to TILE_* environment variables)
    #[arg(long, env = "TILE_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tile replay");

    let config = match &args.config {
        Some(path) => CacheConfig::load_from_file(path)?,
        None => {
            let config = CacheConfig::from_env();
            config.validate()?;
            config
        }
    };
    let script = ReplayScript::load_from_file(&args.script)?;

    let (observer, events) = ChannelObserver::<BucketTile>::new();
    let observer: Arc<dyn CacheObserver<BucketTile>> = Arc::new(observer);
    let events_task = tokio::spawn(log_events(events));

    let cache = TileCacheService::spawn(
        &config,
        GeotileTransform::new(config.tile_size),
        Arc::new(DirectorySource::new(&args.data_dir)),
        observer,
    )?;
    let renderer: Arc<dyn TileRenderer<BucketTile>> = Arc::new(LoggingRenderer);
    let replayer = Replayer::new(AggregationLayer::new(
        script.layer,
        config,
        cache.clone(),
        renderer,
    ));

    info!(
        data_dir = ?args.data_dir,
        layer = ?script.layer,
        loads = script.load_count(),
        "Replaying script"
    );
    let summary = replayer.run(&script).await?;
    let stats = cache.stats().await?;

    info!(
        loaded = summary.loaded,
        empty = summary.empty,
        failed = summary.failed,
        cancelled = summary.cancelled,
        evicted = summary.evicted,
        probe_hits = summary.probe_hits,
        probe_misses = summary.probe_misses,
        fetches = stats.fetches,
        hit_rate = stats.hit_rate(),
        "Replay complete"
    );

    // Stopping the service closes the event channel.
    cache.shutdown().await?;
    drop(replayer);
    events_task.await?;

    Ok(())
}
