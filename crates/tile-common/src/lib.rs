//! Common tile addressing types shared by the tile cache and its services.

pub mod coord;
pub mod error;
pub mod key;

pub use coord::{floor_mod, matrix_size, TileCoord, MAX_ZOOM, TILE_SIZE};
pub use error::{TileError, TileResult};
pub use key::{parse_key, CanonicalKey, RawKey};
