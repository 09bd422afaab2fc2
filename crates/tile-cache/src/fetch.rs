//! Fetch collaborators.
//!
//! The synchronous [`TileCache`](crate::TileCache) only *dispatches* fetches
//! through a [`Fetcher`]; the result comes back later through
//! [`TileCache::complete`](crate::TileCache::complete). The async service
//! bridges that to a [`TileSource`].

use async_trait::async_trait;
use thiserror::Error;
use tile_common::{CanonicalKey, TileCoord, TileError};

/// A fetch failed. Opaque to the cache; carried to waiters and observers.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct FetchFailure {
    pub message: String,
}

impl FetchFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<FetchFailure> for TileError {
    fn from(err: FetchFailure) -> Self {
        TileError::FetchFailed(err.message)
    }
}

impl From<std::io::Error> for FetchFailure {
    fn from(err: std::io::Error) -> Self {
        FetchFailure::new(format!("I/O error: {}", err))
    }
}

/// Identifies one dispatched fetch.
///
/// `generation` distinguishes a fetch for an entry that was evicted and then
/// re-requested from the fetch of its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub key: CanonicalKey,
    pub generation: u64,
}

impl FetchTicket {
    /// The normalized coordinate to fetch.
    pub fn coord(&self) -> TileCoord {
        self.key.coord()
    }
}

/// Starts fetches on behalf of the cache. Must not call back into the cache.
pub trait Fetcher: Send {
    fn dispatch(&mut self, ticket: FetchTicket);
}

/// Asynchronous source of raw tile data for a canonical coordinate.
#[async_trait]
pub trait TileSource: Send + Sync + 'static {
    type Raw: Send + 'static;

    async fn fetch(&self, coord: TileCoord) -> Result<Self::Raw, FetchFailure>;
}
