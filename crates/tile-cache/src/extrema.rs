//! Running value range across every loaded tile.

use serde::{Deserialize, Serialize};

/// A closed `[min, max]` value range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Width of the range.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Position of `value` within the range, clamped to 0.0 - 1.0.
    ///
    /// A degenerate range maps everything to 0.0.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.span();
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// Tracks the widest range of values seen since the last [`clear`](Self::clear).
///
/// The range only ever widens; a query or aggregation change makes every
/// previously loaded value stale and must clear it explicitly.
#[derive(Debug, Clone)]
pub struct ExtremaTracker {
    min: f64,
    max: f64,
}

impl Default for ExtremaTracker {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl ExtremaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty range.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Widen the range to include `values`.
    ///
    /// Returns true if the range changed. NaN values are ignored, so an empty
    /// or all-NaN slice never changes anything.
    pub fn update(&mut self, values: &[f64]) -> bool {
        let mut local_min = f64::INFINITY;
        let mut local_max = f64::NEG_INFINITY;
        for &v in values.iter().filter(|v| !v.is_nan()) {
            local_min = local_min.min(v);
            local_max = local_max.max(v);
        }

        let mut changed = false;
        if local_min < self.min {
            self.min = local_min;
            changed = true;
        }
        if local_max > self.max {
            self.max = local_max;
            changed = true;
        }
        changed
    }

    /// True until the first non-NaN value is seen.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Current range, or None if nothing has been seen yet.
    pub fn range(&self) -> Option<ValueRange> {
        if self.is_empty() {
            None
        } else {
            Some(ValueRange::new(self.min, self.max))
        }
    }
}
