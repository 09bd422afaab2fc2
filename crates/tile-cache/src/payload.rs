//! Capabilities a tile payload brings to the cache.

use crate::spatial::HitPoint;

/// Transformed, render-ready tile data.
pub trait TilePayload: Send + Sync + 'static {
    /// What a hit test returns for a matched point.
    type Item: Clone + Send + Sync + 'static;

    /// Values folded into the running extrema when the tile loads.
    fn values(&self) -> Vec<f64>;

    /// Points in tile-local pixels used to build the hit-test index.
    fn hit_points(&self) -> Vec<HitPoint<Self::Item>> {
        Vec::new()
    }
}

/// Turns raw fetched data into a payload.
///
/// Returning `None` means the tile has nothing usable (e.g. no buckets); it is
/// not an error.
pub trait TileTransform<R, P>: Send + Sync {
    fn transform(&self, raw: R) -> Option<P>;
}

impl<R, P, F> TileTransform<R, P> for F
where
    F: Fn(R) -> Option<P> + Send + Sync,
{
    fn transform(&self, raw: R) -> Option<P> {
        self(raw)
    }
}
