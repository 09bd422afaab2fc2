//! Drives an aggregation layer through a replay script.

use std::sync::Arc;

use futures::future::join_all;
use tile_cache::{
    AggregationLayer, BucketTile, CacheEvent, ReleaseOutcome, TileHandle, TileReady,
    TileRenderer, ValueRange,
};
use tile_common::{RawKey, TileCoord, TileError, TileResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::script::{ReplayScript, Step};

/// Renderer that logs what would be drawn.
#[derive(Debug, Default)]
pub struct LoggingRenderer;

impl TileRenderer<BucketTile> for LoggingRenderer {
    fn render(&self, tile: &RawKey, payload: &BucketTile, range: Option<ValueRange>) {
        info!(
            tile = %tile,
            cells = payload.cells.len(),
            docs = payload.total_docs(),
            min = range.map(|r| r.min),
            max = range.map(|r| r.max),
            "Render tile"
        );
    }

    fn clear(&self, tile: &RawKey) {
        debug!(tile = %tile, "Clear tile");
    }
}

/// Outcome counts for one replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub loaded: usize,
    pub empty: usize,
    pub failed: usize,
    /// Loads whose tile went away before the data arrived
    pub cancelled: usize,
    pub evicted: usize,
    pub probe_hits: usize,
    pub probe_misses: usize,
}

impl ReplaySummary {
    fn record_load(&mut self, result: TileResult<TileReady<BucketTile>>) {
        match result {
            Ok(TileReady::Loaded { .. }) => self.loaded += 1,
            Ok(TileReady::Empty { .. }) => self.empty += 1,
            Ok(TileReady::Failed { key, error }) => {
                warn!(key = %key, error = %error, "Tile load failed");
                self.failed += 1;
            }
            Err(TileError::Cancelled) => self.cancelled += 1,
            Err(e) => {
                warn!(error = %e, "Tile load aborted");
                self.failed += 1;
            }
        }
    }
}

/// Runs scripts against one layer. Every step reaches the cache in script
/// order; waiting for a load's data runs concurrently with later steps, as
/// the tiling framework would issue them.
pub struct Replayer {
    layer: Arc<AggregationLayer<BucketTile>>,
}

impl Replayer {
    pub fn new(layer: AggregationLayer<BucketTile>) -> Self {
        Self {
            layer: Arc::new(layer),
        }
    }

    pub fn layer(&self) -> &AggregationLayer<BucketTile> {
        &self.layer
    }

    pub async fn run(&self, script: &ReplayScript) -> TileResult<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut loads: Vec<JoinHandle<TileResult<TileReady<BucketTile>>>> = Vec::new();

        for step in &script.steps {
            match *step {
                Step::Load { z, x, y, handle } => {
                    let raw = TileCoord::new(z, x, y);
                    // Register in script order; only the wait for data runs
                    // alongside later steps.
                    match self.layer.begin_tile_load(raw, TileHandle(handle)).await {
                        Ok(pending) => {
                            debug!(tile = %pending.raw(), handle, "Tile registered");
                            let layer = Arc::clone(&self.layer);
                            loads.push(tokio::spawn(async move {
                                layer.finish_tile_load(pending).await
                            }));
                        }
                        Err(e) => summary.record_load(Err(e)),
                    }
                }
                Step::Unload { z, x, y } => {
                    let raw = TileCoord::new(z, x, y);
                    if self.layer.on_tile_unload(raw).await? == ReleaseOutcome::Evicted {
                        summary.evicted += 1;
                    }
                }
                Step::Probe { z, x, y, px, py } => {
                    let raw = TileCoord::new(z, x, y);
                    match self.layer.probe(raw, px, py).await? {
                        Some(hit) => {
                            info!(
                                tile = %raw,
                                cell = %hit.item.cell,
                                doc_count = hit.item.doc_count,
                                "Probe hit"
                            );
                            summary.probe_hits += 1;
                        }
                        None => summary.probe_misses += 1,
                    }
                }
                Step::QueryChanged => self.layer.query_changed().await?,
                Step::Wait { ms } => {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                }
            }
        }

        for joined in join_all(loads).await {
            match joined {
                Ok(result) => summary.record_load(result),
                Err(e) => {
                    warn!(error = %e, "Load task panicked");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// Log cache notifications until the cache goes away.
pub async fn log_events(mut events: mpsc::UnboundedReceiver<CacheEvent<BucketTile>>) {
    while let Some(event) = events.recv().await {
        match event {
            CacheEvent::Loaded { key, payload } => {
                info!(key = %key, cells = payload.cells.len(), "Tile loaded");
            }
            CacheEvent::Evicted { key, payload } => {
                info!(key = %key, had_data = payload.is_some(), "Tile evicted");
            }
            CacheEvent::ExtremaChanged(range) => {
                info!(min = range.min, max = range.max, "Value range widened");
            }
            CacheEvent::FetchFailed { key, error } => {
                warn!(key = %key, error = %error, "Tile fetch failed");
            }
        }
    }
}
