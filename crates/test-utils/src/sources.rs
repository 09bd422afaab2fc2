//! Tile sources whose fetches the test controls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tile_cache::{FetchFailure, TileSource};
use tile_common::TileCoord;
use tokio::sync::Semaphore;

/// A source whose fetches block until the test opens the gate.
///
/// Each call is recorded before it waits, so tests can assert how many
/// fetches were started while they are all still in flight.
pub struct GatedSource {
    responses: Mutex<HashMap<TileCoord, Result<Vec<f64>, FetchFailure>>>,
    calls: Mutex<Vec<TileCoord>>,
    gate: Semaphore,
    fallback: Vec<f64>,
}

impl GatedSource {
    /// A closed gate; every tile answers `fallback` unless told otherwise.
    pub fn new(fallback: Vec<f64>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
            fallback,
        })
    }

    /// An open gate: fetches resolve immediately.
    pub fn open_with(fallback: Vec<f64>) -> Arc<Self> {
        let source = Self::new(fallback);
        source.open_all();
        source
    }

    /// Set the answer for one canonical coordinate.
    pub fn respond(&self, coord: TileCoord, response: Result<Vec<f64>, FetchFailure>) {
        self.responses.lock().unwrap().insert(coord, response);
    }

    /// Let `n` waiting (or future) fetches through.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn open_all(&self) {
        self.gate.add_permits(1 << 20);
    }

    pub fn calls(&self) -> Vec<TileCoord> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` fetches have started, or panic after a second.
    pub async fn wait_for_calls(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while self.calls.lock().unwrap().len() < n {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "expected {} fetches, saw {}",
                    n,
                    self.calls.lock().unwrap().len()
                );
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl TileSource for GatedSource {
    type Raw = Vec<f64>;

    async fn fetch(&self, coord: TileCoord) -> Result<Vec<f64>, FetchFailure> {
        self.calls.lock().unwrap().push(coord);

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchFailure::new("gate closed"))?;
        permit.forget();

        let response = self.responses.lock().unwrap().get(&coord).cloned();
        response.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
