//! Spatial hash grid for hit testing rendered points.
//!
//! Points live in tile-local pixel space. The grid cell size is twice the
//! hit radius, so anything within `radius` of a query lies in the query's
//! cell or one of its 8 neighbours. Instead of scanning 9 cells per query,
//! each point is also filed into the neighbouring cells on the sides it is
//! closest to, and a query only inspects its own cell.

use std::collections::HashMap;

use tile_common::{TileError, TileResult};

/// A point in tile-local pixel space carrying a caller-defined item.
#[derive(Debug, Clone, PartialEq)]
pub struct HitPoint<T> {
    pub x: f64,
    pub y: f64,
    pub item: T,
}

impl<T> HitPoint<T> {
    pub fn new(x: f64, y: f64, item: T) -> Self {
        Self { x, y, item }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CellKey(i64, i64);

/// Uniform grid index over tile-local points.
///
/// Immutable once built. Buckets hold indices into `points`, so duplicating a
/// point near a cell boundary costs one `usize` per extra cell.
#[derive(Debug, Clone)]
pub struct SpatialHashIndex<T> {
    radius: f64,
    cell_size: f64,
    points: Vec<HitPoint<T>>,
    buckets: HashMap<CellKey, Vec<usize>>,
}

impl<T> SpatialHashIndex<T> {
    /// Create an empty index for the given hit radius.
    pub fn new(radius: f64) -> TileResult<Self> {
        validate_radius(radius)?;
        Ok(Self {
            radius,
            cell_size: radius * 2.0,
            points: Vec::new(),
            buckets: HashMap::new(),
        })
    }

    /// Build an index from `points` in one pass, preserving their order.
    pub fn build(points: impl IntoIterator<Item = HitPoint<T>>, radius: f64) -> TileResult<Self> {
        let mut index = Self::new(radius)?;
        for point in points {
            index.insert(point);
        }
        Ok(index)
    }

    /// Hit radius the grid was sized for.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of distinct points indexed.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of non-empty grid cells.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Add a point. Points with non-finite coordinates are skipped.
    pub fn insert(&mut self, point: HitPoint<T>) {
        if !(point.x.is_finite() && point.y.is_finite()) {
            return;
        }

        let fx = point.x / self.cell_size;
        let fy = point.y / self.cell_size;
        let cx = fx.floor() as i64;
        let cy = fy.floor() as i64;

        // Side of the cell the point leans towards; 0 when dead centre, since
        // a neighbour's query can then never be strictly within the radius.
        let dx = lean(fx - cx as f64);
        let dy = lean(fy - cy as f64);

        let idx = self.points.len();
        self.points.push(point);

        self.file(CellKey(cx, cy), idx);
        if dx != 0 {
            self.file(CellKey(cx + dx, cy), idx);
        }
        if dy != 0 {
            self.file(CellKey(cx, cy + dy), idx);
        }
        if dx != 0 && dy != 0 {
            self.file(CellKey(cx + dx, cy + dy), idx);
        }
    }

    fn file(&mut self, cell: CellKey, idx: usize) {
        self.buckets.entry(cell).or_default().push(idx);
    }

    fn cell_of(&self, x: f64, y: f64) -> CellKey {
        CellKey(
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// First point (in insertion order) strictly within `radius` of `(x, y)`.
    ///
    /// Not necessarily the nearest. Only the query's own cell is scanned, so
    /// a `radius` larger than the one the index was built for can miss points.
    pub fn query_first(&self, x: f64, y: f64, radius: f64) -> Option<&HitPoint<T>> {
        if !(x.is_finite() && y.is_finite()) || validate_radius(radius).is_err() {
            return None;
        }
        let bucket = self.buckets.get(&self.cell_of(x, y))?;
        let r2 = radius * radius;
        bucket
            .iter()
            .map(|&idx| &self.points[idx])
            .find(|p| {
                let ddx = p.x - x;
                let ddy = p.y - y;
                ddx * ddx + ddy * ddy < r2
            })
    }
}

fn lean(frac: f64) -> i64 {
    if frac < 0.5 {
        -1
    } else if frac > 0.5 {
        1
    } else {
        0
    }
}

/// Hit radii must be finite and strictly positive.
pub fn validate_radius(radius: f64) -> TileResult<()> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(TileError::InvalidRadius(radius))
    }
}
