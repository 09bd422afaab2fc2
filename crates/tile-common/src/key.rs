//! Cache keys for raw and canonical tiles.
//!
//! Keys are value types with structural equality; the `z:x:y` string form
//! exists only for logging and serialization and round-trips through
//! [`parse_key`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{TileCoord, TileError, TileResult, MAX_ZOOM};

const SEPARATOR: char = ':';

/// Parse a `z:x:y` key back into a coordinate.
///
/// Exactly three integer fields are accepted; `z` must be in `0..=MAX_ZOOM`,
/// `x` and `y` may be negative.
pub fn parse_key(key: &str) -> TileResult<TileCoord> {
    let parts: Vec<&str> = key.split(SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(TileError::MalformedKey(key.to_string()));
    }

    let malformed = |_| TileError::MalformedKey(key.to_string());
    let z: u32 = parts[0].parse().map_err(malformed)?;
    let x: i64 = parts[1].parse().map_err(malformed)?;
    let y: i64 = parts[2].parse().map_err(malformed)?;

    if z > MAX_ZOOM {
        return Err(TileError::MalformedKey(key.to_string()));
    }

    Ok(TileCoord { z, x, y })
}

fn format_key(coord: &TileCoord, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{SEPARATOR}{}{SEPARATOR}{}", coord.z, coord.x, coord.y)
}

/// Identifies one screen-space tile instance, wrapped or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RawKey(TileCoord);

impl RawKey {
    pub fn coord(&self) -> TileCoord {
        self.0
    }

    /// The canonical key this raw tile resolves to.
    pub fn canonical(&self) -> CanonicalKey {
        CanonicalKey::from_coord(&self.0)
    }
}

impl From<TileCoord> for RawKey {
    fn from(coord: TileCoord) -> Self {
        RawKey(coord)
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_key(&self.0, f)
    }
}

impl FromStr for RawKey {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_key(s).map(RawKey)
    }
}

impl TryFrom<String> for RawKey {
    type Error = TileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RawKey> for String {
    fn from(key: RawKey) -> Self {
        key.to_string()
    }
}

/// Identifies the data shared by every wrapped copy of a tile.
///
/// Can only be built from a normalized coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalKey(TileCoord);

impl CanonicalKey {
    /// Normalize `coord` and wrap it as a key.
    pub fn from_coord(coord: &TileCoord) -> Self {
        CanonicalKey(coord.normalize())
    }

    /// The normalized coordinate, inside `[0, 2^z)` on both axes.
    pub fn coord(&self) -> TileCoord {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_key(&self.0, f)
    }
}

impl FromStr for CanonicalKey {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coord = parse_key(s)?;
        if !coord.is_canonical() {
            return Err(TileError::MalformedKey(s.to_string()));
        }
        Ok(CanonicalKey(coord))
    }
}

impl TryFrom<String> for CanonicalKey {
    type Error = TileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CanonicalKey> for String {
    fn from(key: CanonicalKey) -> Self {
        key.to_string()
    }
}
