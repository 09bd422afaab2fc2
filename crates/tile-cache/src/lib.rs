//! Tile data cache and request coordination for aggregated map layers.
//!
//! Provides:
//! - A coordinator cache that deduplicates fetches across wrapped tiles
//! - Running value extrema for color/size scaling
//! - A spatial hash for sub-pixel hit testing
//! - A tokio service owning the cache on a single task
//! - Aggregation layers composing the cache with a renderer

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod extrema;
pub mod fetch;
pub mod layer;
pub mod observer;
pub mod payload;
pub mod service;
pub mod source;
pub mod spatial;

pub use aggregation::{Bucket, BucketCell, BucketTile, GeotileTransform};
pub use cache::{CacheEntry, CacheStats, EntryState, OnReady, ReleaseOutcome, TileCache, TileHandle, TileReady};
pub use config::CacheConfig;
pub use extrema::{ExtremaTracker, ValueRange};
pub use fetch::{FetchFailure, FetchTicket, Fetcher, TileSource};
pub use layer::{AggregationLayer, LayerKind, PendingLoad, TileRenderer};
pub use observer::{CacheEvent, CacheObserver, ChannelObserver, NoopObserver};
pub use payload::{TilePayload, TileTransform};
pub use service::{EntryInfo, TileCacheHandle, TileCacheService};
pub use source::{DirectorySource, RawTile};
pub use spatial::{HitPoint, SpatialHashIndex};
