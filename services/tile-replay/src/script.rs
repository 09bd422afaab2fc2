//! Replay scripts.
//!
//! A script is a YAML list of tiling-framework events replayed in order:
//!
//! ```yaml
//! layer: grid
//! steps:
//!   - op: load
//!     z: 2
//!     x: -3
//!     y: 1
//!     handle: 1
//!   - op: wait
//!     ms: 50
//!   - op: probe
//!     z: 2
//!     x: -3
//!     y: 1
//!     px: 5.0
//!     py: 5.0
//!   - op: unload
//!     z: 2
//!     x: -3
//!     y: 1
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tile_cache::LayerKind;
use tile_common::{TileCoord, MAX_ZOOM};

/// One replayed event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// A screen tile was created
    Load { z: u32, x: i64, y: i64, handle: u64 },
    /// A screen tile was destroyed
    Unload { z: u32, x: i64, y: i64 },
    /// Pointer over a tile-local pixel
    Probe { z: u32, x: i64, y: i64, px: f64, py: f64 },
    /// Query or aggregation parameters changed
    QueryChanged,
    /// Let in-flight fetches make progress
    Wait { ms: u64 },
}

impl Step {
    /// Raw tile the step addresses, if any.
    pub fn coord(&self) -> Option<TileCoord> {
        match *self {
            Step::Load { z, x, y, .. } | Step::Unload { z, x, y } | Step::Probe { z, x, y, .. } => {
                Some(TileCoord::new(z, x, y))
            }
            Step::QueryChanged | Step::Wait { .. } => None,
        }
    }

    pub fn wait(&self) -> Option<Duration> {
        match self {
            Step::Wait { ms } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

fn default_layer() -> LayerKind {
    LayerKind::Points
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayScript {
    #[serde(default = "default_layer")]
    pub layer: LayerKind,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl ReplayScript {
    pub fn parse(content: &str) -> Result<Self> {
        let script: ReplayScript =
            serde_yaml::from_str(content).context("Failed to parse replay script")?;
        script.validate()?;
        Ok(script)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read: {:?}", path))?;
        let script = Self::parse(&content).with_context(|| format!("In script {:?}", path))?;

        tracing::info!(
            path = ?path,
            layer = ?script.layer,
            steps = script.steps.len(),
            "Loaded replay script"
        );
        Ok(script)
    }

    fn validate(&self) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(coord) = step.coord() {
                anyhow::ensure!(
                    coord.z <= MAX_ZOOM,
                    "step {}: zoom {} exceeds maximum {}",
                    i,
                    coord.z,
                    MAX_ZOOM
                );
            }
        }
        Ok(())
    }

    /// Number of load steps.
    pub fn load_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Load { .. }))
            .count()
    }
}
