//! Geotile-grid aggregation responses as tile payloads.
//!
//! The backend answers a tile request with buckets keyed by `z/x/y` sub-tiles
//! a few zoom levels below the requested tile. Each bucket becomes a point at
//! the centre of its sub-tile, in the requested tile's local pixel space.
//!
//! ```json
//! {"buckets": [{"key": "7/40/48", "doc_count": 12}, {"key": "7/41/48", "doc_count": 3, "value": 0.4}]}
//! ```

use serde::{Deserialize, Serialize};
use tile_common::{matrix_size, TileCoord, TILE_SIZE};
use tracing::warn;

use crate::payload::{TilePayload, TileTransform};
use crate::source::RawTile;
use crate::spatial::HitPoint;

/// One aggregation bucket as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Sub-tile key, `z/x/y`
    pub key: String,
    pub doc_count: u64,
    /// Metric sub-aggregation value; doc_count is used when absent
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BucketResponse {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

/// A bucket positioned inside its tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCell {
    /// The sub-tile this bucket aggregates
    pub cell: TileCoord,
    pub doc_count: u64,
    pub value: f64,
    /// Tile-local pixel position of the sub-tile centre
    pub x: f64,
    pub y: f64,
}

/// Transformed payload for one tile of a geotile-grid aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketTile {
    pub tile: TileCoord,
    /// Edge length of one bucket's sub-tile, in pixels
    pub cell_size_px: f64,
    pub cells: Vec<BucketCell>,
}

impl BucketTile {
    pub fn total_docs(&self) -> u64 {
        self.cells.iter().map(|c| c.doc_count).sum()
    }
}

impl TilePayload for BucketTile {
    type Item = BucketCell;

    fn values(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.value).collect()
    }

    fn hit_points(&self) -> Vec<HitPoint<BucketCell>> {
        self.cells
            .iter()
            .map(|c| HitPoint::new(c.x, c.y, c.clone()))
            .collect()
    }
}

fn parse_bucket_key(key: &str) -> Option<TileCoord> {
    let mut parts = key.split('/');
    let z = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    TileCoord::checked(z, x, y).ok()
}

/// Turns [`RawTile`] responses into [`BucketTile`]s.
#[derive(Debug, Clone)]
pub struct GeotileTransform {
    tile_size: u32,
}

impl Default for GeotileTransform {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
        }
    }
}

impl GeotileTransform {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    /// Place `bucket` inside `tile`, or None if it lies elsewhere.
    fn position(&self, tile: &TileCoord, bucket: &Bucket) -> Option<BucketCell> {
        let cell = parse_bucket_key(&bucket.key)?;
        if cell.z < tile.z {
            return None;
        }

        let scale = matrix_size(cell.z - tile.z);
        let local_x = cell.x - tile.x * scale;
        let local_y = cell.y - tile.y * scale;
        if !(0..scale).contains(&local_x) || !(0..scale).contains(&local_y) {
            return None;
        }

        let cell_px = self.tile_size as f64 / scale as f64;
        Some(BucketCell {
            cell,
            doc_count: bucket.doc_count,
            value: bucket.value.unwrap_or(bucket.doc_count as f64),
            x: (local_x as f64 + 0.5) * cell_px,
            y: (local_y as f64 + 0.5) * cell_px,
        })
    }

    /// Parse and position a response body. Empty bodies and responses with
    /// no buckets inside the tile yield None.
    pub fn parse(&self, raw: &RawTile) -> Option<BucketTile> {
        if raw.is_empty() {
            return None;
        }

        let response: BucketResponse = match serde_json::from_slice(&raw.body) {
            Ok(r) => r,
            Err(e) => {
                warn!(tile = %raw.coord, error = %e, "Unparsable aggregation response");
                return None;
            }
        };

        let tile = raw.coord;
        let total = response.buckets.len();
        let cells: Vec<BucketCell> = response
            .buckets
            .iter()
            .filter_map(|b| self.position(&tile, b))
            .collect();

        if cells.len() < total {
            warn!(
                tile = %tile,
                dropped = total - cells.len(),
                "Dropped buckets outside the tile"
            );
        }
        if cells.is_empty() {
            return None;
        }

        let cell_size_px = self.tile_size as f64 / matrix_size(cells[0].cell.z - tile.z) as f64;
        Some(BucketTile {
            tile,
            cell_size_px,
            cells,
        })
    }
}

impl TileTransform<RawTile, BucketTile> for GeotileTransform {
    fn transform(&self, raw: RawTile) -> Option<BucketTile> {
        self.parse(&raw)
    }
}
