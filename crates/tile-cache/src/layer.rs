//! Aggregation layers.
//!
//! A layer is the cache service plus a renderer, wired to the tiling
//! framework's load/unload events. Layer variants differ only in how they
//! size the hit-test radius; everything else is shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tile_common::{matrix_size, RawKey, TileCoord, TileError, TileResult};
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::{ReleaseOutcome, TileHandle, TileReady};
use crate::config::CacheConfig;
use crate::extrema::ValueRange;
use crate::payload::TilePayload;
use crate::service::TileCacheHandle;
use crate::spatial::HitPoint;

/// Deepest geotile precision the aggregation backend supports.
pub const MAX_GEOTILE_PRECISION: u32 = 29;

/// The closed set of layer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// One circle per bucket
    Points,
    /// One filled square per bucket
    Grid,
    /// Blurred density surface
    Heatmap,
}

impl LayerKind {
    /// Hit-test radius in tile-local pixels at zoom `z`.
    pub fn hit_radius(&self, z: u32, config: &CacheConfig) -> f64 {
        match self {
            LayerKind::Points => config.hit_radius_px,
            LayerKind::Heatmap => config.heatmap_radius_px,
            LayerKind::Grid => {
                // Near the precision limit buckets stop getting smaller, so
                // fewer (larger) cells cover a tile.
                let precision = (z + config.precision_delta).min(MAX_GEOTILE_PRECISION);
                let delta = precision.saturating_sub(z);
                config.tile_size as f64 / matrix_size(delta) as f64 / 2.0
            }
        }
    }
}

/// Draws loaded tiles. Concrete back ends live outside this crate.
pub trait TileRenderer<P>: Send + Sync {
    /// Draw `payload` into the screen tile `tile`.
    fn render(&self, tile: &RawKey, payload: &P, range: Option<ValueRange>);

    /// The screen tile went away; release anything held for it.
    fn clear(&self, _tile: &RawKey) {}
}

/// A screen tile registered with the cache whose data has not been drawn yet.
pub struct PendingLoad<P: TilePayload> {
    raw: TileCoord,
    rx: oneshot::Receiver<TileReady<P>>,
}

impl<P: TilePayload> PendingLoad<P> {
    pub fn raw(&self) -> TileCoord {
        self.raw
    }
}

/// A cache-backed layer of one [`LayerKind`].
pub struct AggregationLayer<P: TilePayload> {
    kind: LayerKind,
    config: CacheConfig,
    cache: TileCacheHandle<P>,
    renderer: Arc<dyn TileRenderer<P>>,
}

impl<P: TilePayload> AggregationLayer<P> {
    pub fn new(
        kind: LayerKind,
        config: CacheConfig,
        cache: TileCacheHandle<P>,
        renderer: Arc<dyn TileRenderer<P>>,
    ) -> Self {
        Self {
            kind,
            config,
            cache,
            renderer,
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn cache(&self) -> &TileCacheHandle<P> {
        &self.cache
    }

    /// The tiling framework created a screen tile: load and draw it.
    ///
    /// Errors with `Cancelled` if the tile is unloaded before its data
    /// arrives.
    pub async fn on_tile_load(&self, raw: TileCoord, handle: TileHandle) -> TileResult<TileReady<P>> {
        let pending = self.begin_tile_load(raw, handle).await?;
        self.finish_tile_load(pending).await
    }

    /// Register a screen tile with the cache without waiting for its data.
    ///
    /// The reference exists once this returns, so an unload issued afterwards
    /// always sees it.
    pub async fn begin_tile_load(&self, raw: TileCoord, handle: TileHandle) -> TileResult<PendingLoad<P>> {
        let rx = self.cache.request(raw, handle).await?;
        Ok(PendingLoad { raw, rx })
    }

    /// Wait for a registered tile's data and draw it.
    pub async fn finish_tile_load(&self, pending: PendingLoad<P>) -> TileResult<TileReady<P>> {
        let PendingLoad { raw, rx } = pending;
        let ready = rx.await.map_err(|_| {
            debug!(raw = %raw, "Tile request discarded before it resolved");
            TileError::Cancelled
        })?;
        if let Some(payload) = ready.payload() {
            let range = self.cache.extrema().await?;
            self.renderer.render(&raw.raw_key(), payload, range);
        } else {
            debug!(raw = %raw, "Nothing to draw for tile");
        }
        Ok(ready)
    }

    /// The tiling framework removed a screen tile.
    pub async fn on_tile_unload(&self, raw: TileCoord) -> TileResult<ReleaseOutcome> {
        self.renderer.clear(&raw.raw_key());
        self.cache.release(raw).await
    }

    /// Find the item under a tile-local pixel position of a screen tile.
    pub async fn probe(&self, raw: TileCoord, x: f64, y: f64) -> TileResult<Option<HitPoint<P::Item>>> {
        let radius = self.kind.hit_radius(raw.z, &self.config);
        self.cache.hit_test(raw.canonical_key(), x, y, radius).await
    }

    /// The query or aggregation parameters changed; everything loaded is stale.
    pub async fn query_changed(&self) -> TileResult<()> {
        debug!(kind = ?self.kind, "Query changed, resetting layer cache");
        self.cache.reset().await
    }
}
