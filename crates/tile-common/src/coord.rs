//! Tile coordinates and wraparound normalization.
//!
//! A slippy map repeats the world horizontally, so the tiling framework hands
//! out tile columns outside `[0, 2^z)` for the copies left and right of the
//! primary world. All of those copies show the same data; normalizing folds
//! them back onto one canonical tile.

use serde::{Deserialize, Serialize};

use crate::{CanonicalKey, RawKey, TileError, TileResult};

/// Deepest zoom level accepted from external input.
pub const MAX_ZOOM: u32 = 30;

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Non-negative remainder of `n / m`. `m` must be positive.
///
/// Equivalent to `((n % m) + m) % m` without the intermediate overflow.
pub fn floor_mod(n: i64, m: i64) -> i64 {
    debug_assert!(m > 0, "floor_mod requires a positive modulus");
    n.rem_euclid(m)
}

/// Number of tile columns (and rows) at zoom `z`, i.e. `2^z`.
///
/// Exact up to zoom 62. Deeper zooms saturate; coordinates built through
/// [`TileCoord::checked`] never get there.
pub fn matrix_size(z: u32) -> i64 {
    1i64 << z.min(62)
}

/// A tile coordinate (z/x/y) as requested by the tiling framework.
///
/// `x` and `y` are signed: wrapped copies of the world produce columns
/// outside `[0, 2^z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x), possibly wrapped
    pub x: i64,
    /// Row (y), possibly wrapped
    pub y: i64,
}

impl TileCoord {
    pub fn new(z: u32, x: i64, y: i64) -> Self {
        Self { z, x, y }
    }

    /// Create a coordinate from external input, rejecting zooms past [`MAX_ZOOM`].
    pub fn checked(z: u32, x: i64, y: i64) -> TileResult<Self> {
        if z > MAX_ZOOM {
            return Err(TileError::InvalidZoom { zoom: z, max: MAX_ZOOM });
        }
        Ok(Self { z, x, y })
    }

    /// Fold `x` and `y` into `[0, 2^z)`.
    pub fn normalize(&self) -> TileCoord {
        let n = matrix_size(self.z);
        TileCoord {
            z: self.z,
            x: floor_mod(self.x, n),
            y: floor_mod(self.y, n),
        }
    }

    /// True if the coordinate already lies inside the tile matrix.
    pub fn is_canonical(&self) -> bool {
        let n = matrix_size(self.z);
        (0..n).contains(&self.x) && (0..n).contains(&self.y)
    }

    /// Which copy of the world this column belongs to (0 = primary, -1 = the
    /// copy to the west, 1 = the copy to the east).
    pub fn wrap_offset(&self) -> i64 {
        self.x.div_euclid(matrix_size(self.z))
    }

    /// Key identifying this exact screen tile.
    pub fn raw_key(&self) -> RawKey {
        RawKey::from(*self)
    }

    /// Key identifying the data shared by every wrapped copy of this tile.
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey::from_coord(self)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
