//! Tile sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tile_common::TileCoord;
use tracing::debug;

use crate::fetch::{FetchFailure, TileSource};

/// Raw response body for one canonical tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTile {
    pub coord: TileCoord,
    pub body: Bytes,
}

impl RawTile {
    pub fn new(coord: TileCoord, body: impl Into<Bytes>) -> Self {
        Self {
            coord,
            body: body.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Serves pre-computed aggregation responses from `{root}/{z}/{x}/{y}.json`.
///
/// A missing file is an empty tile, not a failure.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path holding the response for `coord`.
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.json", coord.y))
    }
}

#[async_trait]
impl TileSource for DirectorySource {
    type Raw = RawTile;

    async fn fetch(&self, coord: TileCoord) -> Result<RawTile, FetchFailure> {
        let path = self.tile_path(coord);
        match tokio::fs::read(&path).await {
            Ok(body) => {
                debug!(tile = %coord, bytes = body.len(), "Read tile response");
                Ok(RawTile::new(coord, body))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(tile = %coord, path = ?path, "No response on disk, treating as empty");
                Ok(RawTile::new(coord, Bytes::new()))
            }
            Err(e) => Err(FetchFailure::new(format!("Failed to read {:?}: {}", path, e))),
        }
    }
}
