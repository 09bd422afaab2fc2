//! Test data generators for points and aggregation responses.

use std::path::Path;

use tile_cache::HitPoint;
use tile_common::TileCoord;

/// A regular grid of points, each carrying its index.
///
/// Point `i` sits at column `i % cols`, row `i / cols`, spaced `spacing`
/// pixels apart starting from `origin`.
///
/// # Example
///
/// ```
/// use test_utils::point_grid;
///
/// let points = point_grid(3, 2, 10.0, (5.0, 5.0));
/// assert_eq!(points.len(), 6);
/// assert_eq!((points[4].x, points[4].y), (15.0, 15.0));
/// ```
pub fn point_grid(cols: usize, rows: usize, spacing: f64, origin: (f64, f64)) -> Vec<HitPoint<usize>> {
    (0..cols * rows)
        .map(|i| {
            let col = (i % cols) as f64;
            let row = (i / cols) as f64;
            HitPoint::new(origin.0 + col * spacing, origin.1 + row * spacing, i)
        })
        .collect()
}

/// A geotile-grid response body with one bucket per `(x, y, doc_count)`
/// at precision `z`.
///
/// # Example
///
/// ```
/// use test_utils::bucket_response;
///
/// let body = bucket_response(4, &[(4, 4, 10)]);
/// assert!(body.contains("\"4/4/4\""));
/// ```
pub fn bucket_response(z: u32, buckets: &[(i64, i64, u64)]) -> String {
    let buckets: Vec<serde_json::Value> = buckets
        .iter()
        .map(|&(x, y, count)| {
            serde_json::json!({
                "key": format!("{}/{}/{}", z, x, y),
                "doc_count": count,
            })
        })
        .collect();
    serde_json::json!({ "buckets": buckets }).to_string()
}

/// Write `body` where a directory tile source expects `coord`'s response.
pub fn write_tile_response(root: &Path, coord: TileCoord, body: &str) -> std::io::Result<()> {
    let dir = root.join(coord.z.to_string()).join(coord.x.to_string());
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(format!("{}.json", coord.y)), body)
}

/// A temporary directory holding one response per `(coord, body)`, laid out
/// for a directory tile source. The directory is removed on drop.
pub fn tile_directory(tiles: &[(TileCoord, String)]) -> std::io::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    for (coord, body) in tiles {
        write_tile_response(dir.path(), *coord, body)?;
    }
    Ok(dir)
}
