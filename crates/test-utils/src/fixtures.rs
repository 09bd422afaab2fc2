//! Recording collaborators and a simple payload for cache tests.

use std::sync::{Arc, Mutex};

use tile_cache::{
    CacheObserver, FetchFailure, FetchTicket, Fetcher, HitPoint, OnReady, TilePayload,
    TileReady, TileRenderer, ValueRange,
};
use tile_common::{CanonicalKey, RawKey};

/// A tile payload that is just a list of values.
///
/// Hit points are laid out in a row: value `i` sits at `(10 + 40 * i, 10)`
/// and carries `i` as its item.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPayload {
    pub values: Vec<f64>,
}

impl TilePayload for SeriesPayload {
    type Item = usize;

    fn values(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn hit_points(&self) -> Vec<HitPoint<usize>> {
        (0..self.values.len())
            .map(|i| HitPoint::new(10.0 + 40.0 * i as f64, 10.0, i))
            .collect()
    }
}

/// Transform for [`SeriesPayload`]: an empty series is an empty tile.
pub fn series_transform(raw: Vec<f64>) -> Option<SeriesPayload> {
    if raw.is_empty() {
        None
    } else {
        Some(SeriesPayload { values: raw })
    }
}

/// Fetcher that only records what it was asked to fetch.
#[derive(Debug, Clone, Default)]
pub struct RecordingFetcher {
    tickets: Arc<Mutex<Vec<FetchTicket>>>,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ticket dispatched so far.
    pub fn dispatched(&self) -> Vec<FetchTicket> {
        self.tickets.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }

    /// Most recent ticket, for completing it.
    pub fn last(&self) -> Option<FetchTicket> {
        self.tickets.lock().unwrap().last().copied()
    }
}

impl Fetcher for RecordingFetcher {
    fn dispatch(&mut self, ticket: FetchTicket) {
        self.tickets.lock().unwrap().push(ticket);
    }
}

/// A notification as recorded by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Loaded(CanonicalKey),
    Evicted { key: CanonicalKey, had_payload: bool },
    ExtremaChanged(ValueRange),
    FetchFailed { key: CanonicalKey, message: String },
}

/// Observer that records every notification in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Observed) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn loaded_count(&self) -> usize {
        self.count(|e| matches!(e, Observed::Loaded(_)))
    }

    pub fn evicted_count(&self) -> usize {
        self.count(|e| matches!(e, Observed::Evicted { .. }))
    }

    fn push(&self, event: Observed) {
        self.events.lock().unwrap().push(event);
    }
}

impl<P> CacheObserver<P> for RecordingObserver {
    fn loaded(&self, key: &CanonicalKey, _payload: &Arc<P>) {
        self.push(Observed::Loaded(*key));
    }

    fn evicted(&self, key: &CanonicalKey, payload: Option<&Arc<P>>) {
        self.push(Observed::Evicted {
            key: *key,
            had_payload: payload.is_some(),
        });
    }

    fn extrema_changed(&self, range: ValueRange) {
        self.push(Observed::ExtremaChanged(range));
    }

    fn fetch_failed(&self, key: &CanonicalKey, error: &FetchFailure) {
        self.push(Observed::FetchFailed {
            key: *key,
            message: error.message.clone(),
        });
    }
}

/// Hands out named `OnReady` callbacks and records how each resolved.
///
/// Entries read `"<name>:loaded"`, `"<name>:empty"` or `"<name>:failed"`.
#[derive(Debug, Clone, Default)]
pub struct ReadyLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ReadyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<P: Send + Sync + 'static>(&self, name: &str) -> OnReady<P> {
        let entries = Arc::clone(&self.entries);
        let name = name.to_string();
        Box::new(move |ready: TileReady<P>| {
            let outcome = match ready {
                TileReady::Loaded { .. } => "loaded",
                TileReady::Empty { .. } => "empty",
                TileReady::Failed { .. } => "failed",
            };
            entries.lock().unwrap().push(format!("{}:{}", name, outcome));
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Renderer that records draw and clear calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    rendered: Arc<Mutex<Vec<(RawKey, Option<ValueRange>)>>>,
    cleared: Arc<Mutex<Vec<RawKey>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<(RawKey, Option<ValueRange>)> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<RawKey> {
        self.cleared.lock().unwrap().clone()
    }
}

impl<P> TileRenderer<P> for RecordingRenderer {
    fn render(&self, tile: &RawKey, _payload: &P, range: Option<ValueRange>) {
        self.rendered.lock().unwrap().push((*tile, range));
    }

    fn clear(&self, tile: &RawKey) {
        self.cleared.lock().unwrap().push(*tile);
    }
}
