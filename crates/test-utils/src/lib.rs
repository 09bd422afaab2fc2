//! Shared test utilities for the tile cache workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Recording fetchers, observers and renderers
//! - A gated tile source whose fetches resolve on demand
//! - Point and aggregation-response generators
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod sources;

pub use fixtures::*;
pub use generators::*;
pub use sources::*;

/// Assert two pixel or value measures agree within `epsilon`.
///
/// Radii and cell sizes are derived by division, so compare them this way
/// rather than with `assert_eq!`.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(LayerKind::Grid.hit_radius(2, &config), 4.0, 1e-9);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        if !((left - right).abs() <= epsilon) {
            panic!(
                "measures differ: left {:?}, right {:?}, tolerance {:?}",
                left, right, epsilon
            );
        }
    }};
}
