//! Error types for tile addressing and caching.

use thiserror::Error;

/// Result type alias using TileError.
pub type TileResult<T> = Result<T, TileError>;

/// Primary error type for tile operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileError {
    // === Addressing Errors ===
    #[error("Malformed tile key: {0}. Expected 'z:x:y'")]
    MalformedKey(String),

    #[error("Invalid zoom level {zoom}: must be at most {max}")]
    InvalidZoom { zoom: u32, max: u32 },

    // === Hit-test Errors ===
    #[error("Invalid hit-test radius: {0}")]
    InvalidRadius(f64),

    // === Cache Errors ===
    #[error("Tile cache service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Tile fetch failed: {0}")]
    FetchFailed(String),

    #[error("Tile request cancelled before completion")]
    Cancelled,
}

impl TileError {
    /// Whether the caller can reasonably retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TileError::FetchFailed(_) | TileError::ServiceUnavailable(_)
        )
    }
}
