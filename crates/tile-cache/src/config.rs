//! Tile cache configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tile_common::TILE_SIZE;

/// Settings for the cache service and the layers built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,

    /// Hit-test radius for point layers, in pixels
    pub hit_radius_px: f64,

    /// Hit-test radius for heatmap layers, in pixels
    pub heatmap_radius_px: f64,

    /// How many zoom levels deeper than the tile the aggregation buckets are
    pub precision_delta: u32,

    /// Maximum fetches in flight at once
    pub max_concurrent_fetches: usize,

    /// Per-fetch timeout in milliseconds (none if unset)
    pub fetch_timeout_ms: Option<u64>,

    /// Capacity of the service command channel
    pub command_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            hit_radius_px: 8.0,
            heatmap_radius_px: 16.0,
            precision_delta: 5,
            max_concurrent_fetches: 8,
            fetch_timeout_ms: None,
            command_buffer: 256,
        }
    }
}

impl CacheConfig {
    /// Create from environment variables, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }

        let defaults = Self::default();
        Self {
            tile_size: var("TILE_SIZE").unwrap_or(defaults.tile_size),
            hit_radius_px: var("TILE_HIT_RADIUS_PX").unwrap_or(defaults.hit_radius_px),
            heatmap_radius_px: var("TILE_HEATMAP_RADIUS_PX").unwrap_or(defaults.heatmap_radius_px),
            precision_delta: var("TILE_PRECISION_DELTA").unwrap_or(defaults.precision_delta),
            max_concurrent_fetches: var("TILE_MAX_CONCURRENT_FETCHES")
                .unwrap_or(defaults.max_concurrent_fetches),
            fetch_timeout_ms: var("TILE_FETCH_TIMEOUT_MS").or(defaults.fetch_timeout_ms),
            command_buffer: var("TILE_COMMAND_BUFFER").unwrap_or(defaults.command_buffer),
        }
    }

    /// Load from a YAML file. Missing fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read: {:?}", path))?;
        let config: CacheConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse cache config: {:?}", path))?;
        config.validate()?;

        tracing::info!(
            path = ?path,
            max_concurrent_fetches = config.max_concurrent_fetches,
            hit_radius_px = config.hit_radius_px,
            "Loaded tile cache config"
        );
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.tile_size > 0, "tile_size must be positive");
        anyhow::ensure!(
            self.hit_radius_px.is_finite() && self.hit_radius_px > 0.0,
            "hit_radius_px must be positive, got {}",
            self.hit_radius_px
        );
        anyhow::ensure!(
            self.heatmap_radius_px.is_finite() && self.heatmap_radius_px > 0.0,
            "heatmap_radius_px must be positive, got {}",
            self.heatmap_radius_px
        );
        anyhow::ensure!(
            self.precision_delta <= 12,
            "precision_delta must be at most 12, got {}",
            self.precision_delta
        );
        anyhow::ensure!(
            self.max_concurrent_fetches > 0,
            "max_concurrent_fetches must be positive"
        );
        anyhow::ensure!(self.command_buffer > 0, "command_buffer must be positive");
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}
