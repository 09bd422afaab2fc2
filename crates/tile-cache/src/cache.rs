//! Reference-counted tile data cache with fetch deduplication.
//!
//! One [`CacheEntry`] exists per canonical tile. Every raw (possibly wrapped)
//! screen tile showing that data registers a reference on the entry; the
//! entry's fetch is dispatched once, its waiters are drained in arrival order
//! when the fetch resolves, and the entry is evicted when its last reference
//! is released.
//!
//! ## Resolution policy
//!
//! - Usable payload: stored, extrema widened, waiters receive
//!   [`TileReady::Loaded`], then `loaded` fires once.
//! - Transform yields nothing: waiters receive [`TileReady::Empty`] and the
//!   entry stays cached as empty so later hits resolve immediately.
//! - Fetch failure: the entry is dropped, waiters receive
//!   [`TileReady::Failed`] and `fetch_failed` fires. A later request fetches
//!   again.
//!
//! The cache is a plain state machine: it never blocks and never runs two
//! operations at once. [`TileCacheService`](crate::TileCacheService) confines
//! it to a single task.

use std::collections::HashMap;
use std::sync::Arc;

use tile_common::{CanonicalKey, RawKey, TileCoord, TileResult};
use tracing::{debug, warn};

use crate::extrema::{ExtremaTracker, ValueRange};
use crate::fetch::{FetchFailure, FetchTicket, Fetcher};
use crate::observer::CacheObserver;
use crate::payload::{TilePayload, TileTransform};
use crate::spatial::{validate_radius, HitPoint, SpatialHashIndex};

/// Opaque identity of a screen tile supplied by the tiling framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileHandle(pub u64);

/// What a waiter is told when its tile resolves.
#[derive(Debug)]
pub enum TileReady<P> {
    Loaded { key: CanonicalKey, payload: Arc<P> },
    Empty { key: CanonicalKey },
    Failed { key: CanonicalKey, error: FetchFailure },
}

// Manual impl: cloning shares the payload, so `P` itself need not be Clone.
impl<P> Clone for TileReady<P> {
    fn clone(&self) -> Self {
        match self {
            TileReady::Loaded { key, payload } => TileReady::Loaded {
                key: *key,
                payload: Arc::clone(payload),
            },
            TileReady::Empty { key } => TileReady::Empty { key: *key },
            TileReady::Failed { key, error } => TileReady::Failed {
                key: *key,
                error: error.clone(),
            },
        }
    }
}

impl<P> TileReady<P> {
    pub fn key(&self) -> &CanonicalKey {
        match self {
            TileReady::Loaded { key, .. }
            | TileReady::Empty { key }
            | TileReady::Failed { key, .. } => key,
        }
    }

    pub fn payload(&self) -> Option<&Arc<P>> {
        match self {
            TileReady::Loaded { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Continuation queued on a pending entry.
pub type OnReady<P> = Box<dyn FnOnce(TileReady<P>) + Send>;

/// Lifecycle state of an entry.
#[derive(Debug)]
pub enum EntryState<P> {
    Pending,
    Loaded(Arc<P>),
    Empty,
}

/// One canonical tile's data and bookkeeping.
pub struct CacheEntry<P: TilePayload> {
    key: CanonicalKey,
    generation: u64,
    state: EntryState<P>,
    references: HashMap<RawKey, TileHandle>,
    waiters: Vec<OnReady<P>>,
    spatial_index: Option<SpatialHashIndex<P::Item>>,
}

impl<P: TilePayload> CacheEntry<P> {
    fn pending(key: CanonicalKey, generation: u64) -> Self {
        Self {
            key,
            generation,
            state: EntryState::Pending,
            references: HashMap::new(),
            waiters: Vec::new(),
            spatial_index: None,
        }
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    pub fn state(&self) -> &EntryState<P> {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending)
    }

    pub fn payload(&self) -> Option<&Arc<P>> {
        match &self.state {
            EntryState::Loaded(payload) => Some(payload),
            _ => None,
        }
    }

    /// Raw tiles currently showing this entry.
    pub fn references(&self) -> &HashMap<RawKey, TileHandle> {
        &self.references
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn spatial_index(&self) -> Option<&SpatialHashIndex<P::Item>> {
        self.spatial_index.as_ref()
    }

    fn ready(&self) -> Option<TileReady<P>> {
        match &self.state {
            EntryState::Pending => None,
            EntryState::Loaded(payload) => Some(TileReady::Loaded {
                key: self.key,
                payload: Arc::clone(payload),
            }),
            EntryState::Empty => Some(TileReady::Empty { key: self.key }),
        }
    }

    fn drain_waiters(&mut self, ready: &TileReady<P>) {
        for waiter in std::mem::take(&mut self.waiters) {
            waiter(ready.clone());
        }
    }
}

/// Result of releasing a raw tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other raw tiles still reference the entry.
    Retained { remaining: usize },
    /// The last reference went away and the entry was removed.
    Evicted,
    /// No entry or no such reference; nothing changed.
    NotFound,
}

/// Cache counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Total `request` calls
    pub requests: u64,
    /// Requests answered synchronously from a resolved entry
    pub hits: u64,
    /// Requests queued behind an in-flight fetch
    pub queued: u64,
    /// Fetches dispatched
    pub fetches: u64,
    /// Fetches resolved with a usable payload
    pub loads: u64,
    /// Fetches resolved with nothing usable
    pub empty_loads: u64,
    /// Fetches that failed
    pub failures: u64,
    /// Entries evicted by their last release
    pub evictions: u64,
    /// Completions ignored because their entry was gone or replaced
    pub stale_completions: u64,
    /// Waiters dropped unresolved because their pending entry was evicted
    pub discarded_waiters: u64,
}

impl CacheStats {
    /// Share of requests served without waiting, as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.hits as f64 / self.requests as f64) * 100.0
        }
    }
}

/// The request-coordination cache.
pub struct TileCache<R, P: TilePayload> {
    entries: HashMap<CanonicalKey, CacheEntry<P>>,
    transform: Box<dyn TileTransform<R, P>>,
    fetcher: Box<dyn Fetcher>,
    observer: Arc<dyn CacheObserver<P>>,
    extrema: ExtremaTracker,
    next_generation: u64,
    stats: CacheStats,
}

impl<R, P: TilePayload> TileCache<R, P> {
    pub fn new(
        transform: impl TileTransform<R, P> + 'static,
        fetcher: impl Fetcher + 'static,
        observer: Arc<dyn CacheObserver<P>>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            transform: Box::new(transform),
            fetcher: Box::new(fetcher),
            observer,
            extrema: ExtremaTracker::new(),
            next_generation: 0,
            stats: CacheStats::default(),
        }
    }

    /// Register `handle` as showing `raw` and arrange for `on_ready` to run
    /// once the tile's data is available.
    ///
    /// Resolved entries run `on_ready` before returning. Pending entries queue
    /// it. Unknown tiles get a new entry and exactly one fetch for the
    /// normalized coordinate. Zooms past [`MAX_ZOOM`](tile_common::MAX_ZOOM)
    /// are rejected before anything is registered, so every held key
    /// round-trips through `parse_key`.
    pub fn request(
        &mut self,
        raw: TileCoord,
        handle: TileHandle,
        on_ready: OnReady<P>,
    ) -> TileResult<()> {
        let raw = TileCoord::checked(raw.z, raw.x, raw.y)?;
        let raw_key = raw.raw_key();
        let key = raw_key.canonical();
        self.stats.requests += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            if let Some(previous) = entry.references.insert(raw_key, handle) {
                if previous != handle {
                    debug!(raw = %raw_key, ?previous, ?handle, "Replaced tile handle");
                }
            }

            match entry.ready() {
                Some(ready) => {
                    self.stats.hits += 1;
                    on_ready(ready);
                }
                None => {
                    self.stats.queued += 1;
                    entry.waiters.push(on_ready);
                }
            }
            return Ok(());
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut entry = CacheEntry::pending(key, generation);
        entry.references.insert(raw_key, handle);
        entry.waiters.push(on_ready);
        self.entries.insert(key, entry);

        self.stats.fetches += 1;
        debug!(raw = %raw_key, key = %key, generation, "Dispatching tile fetch");
        self.fetcher.dispatch(FetchTicket { key, generation });
        Ok(())
    }

    /// Deliver the result of a dispatched fetch.
    ///
    /// Completions for entries that were evicted (or evicted and re-created)
    /// since the fetch started are ignored.
    pub fn complete(&mut self, ticket: FetchTicket, result: Result<R, FetchFailure>) {
        let current = self
            .entries
            .get(&ticket.key)
            .is_some_and(|e| e.generation == ticket.generation && e.is_pending());
        if !current {
            self.stats.stale_completions += 1;
            debug!(key = %ticket.key, generation = ticket.generation, "Ignoring stale tile completion");
            return;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(error) => {
                self.stats.failures += 1;
                if let Some(mut entry) = self.entries.remove(&ticket.key) {
                    warn!(
                        key = %ticket.key,
                        references = entry.references.len(),
                        waiters = entry.waiters.len(),
                        error = %error,
                        "Tile fetch failed, dropping entry"
                    );
                    entry.drain_waiters(&TileReady::Failed {
                        key: ticket.key,
                        error: error.clone(),
                    });
                }
                self.observer.fetch_failed(&ticket.key, &error);
                return;
            }
        };

        let payload = self.transform.transform(raw).map(Arc::new);

        // Checked above; the transform cannot touch the map.
        let Some(entry) = self.entries.get_mut(&ticket.key) else {
            return;
        };

        match payload {
            Some(payload) => {
                self.stats.loads += 1;
                entry.state = EntryState::Loaded(Arc::clone(&payload));

                if self.extrema.update(&payload.values()) {
                    if let Some(range) = self.extrema.range() {
                        debug!(min = range.min, max = range.max, "Extrema widened");
                        self.observer.extrema_changed(range);
                    }
                }

                entry.drain_waiters(&TileReady::Loaded {
                    key: ticket.key,
                    payload: Arc::clone(&payload),
                });
                self.observer.loaded(&ticket.key, &payload);
            }
            None => {
                self.stats.empty_loads += 1;
                entry.state = EntryState::Empty;
                debug!(key = %ticket.key, waiters = entry.waiters.len(), "Tile resolved empty");
                entry.drain_waiters(&TileReady::Empty { key: ticket.key });
            }
        }
    }

    /// Drop `raw`'s reference on its entry, evicting the entry when no
    /// references remain.
    pub fn release(&mut self, raw: &RawKey) -> ReleaseOutcome {
        let key = raw.canonical();
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(raw = %raw, "Release for unknown tile entry");
            return ReleaseOutcome::NotFound;
        };

        if entry.references.remove(raw).is_none() {
            debug!(raw = %raw, key = %key, "Release for unregistered raw tile");
            return ReleaseOutcome::NotFound;
        }

        if !entry.references.is_empty() {
            return ReleaseOutcome::Retained {
                remaining: entry.references.len(),
            };
        }

        if let Some(entry) = self.entries.remove(&key) {
            self.stats.evictions += 1;
            if !entry.waiters.is_empty() {
                self.stats.discarded_waiters += entry.waiters.len() as u64;
                debug!(key = %key, waiters = entry.waiters.len(), "Evicted pending entry, discarding waiters");
            }
            self.observer.evicted(&key, entry.payload());
        }
        ReleaseOutcome::Evicted
    }

    /// Drop every entry without eviction notifications.
    ///
    /// Pending waiters are discarded; in-flight fetches complete as stale.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!(entries = count, "Cleared tile cache");
    }

    /// Clear entries and the running extrema, for a query change.
    pub fn reset(&mut self) {
        self.clear();
        self.extrema.clear();
    }

    pub fn get(&self, key: &CanonicalKey) -> Option<&CacheEntry<P>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of raw tiles referencing `key`.
    pub fn reference_count(&self, key: &CanonicalKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.references.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still waiting on their fetch.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_pending()).count()
    }

    pub fn extrema(&self) -> Option<ValueRange> {
        self.extrema.range()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Hit-test a loaded tile at a tile-local pixel position.
    ///
    /// The entry's spatial index is built from its payload on first use and
    /// kept until the entry is evicted. Returns `Ok(None)` for unknown,
    /// pending or empty tiles. A non-positive or non-finite `radius` is
    /// rejected on every call.
    pub fn hit_test(
        &mut self,
        key: &CanonicalKey,
        x: f64,
        y: f64,
        radius: f64,
    ) -> TileResult<Option<HitPoint<P::Item>>> {
        validate_radius(radius)?;
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let EntryState::Loaded(payload) = &entry.state else {
            return Ok(None);
        };

        if entry.spatial_index.is_none() {
            let index = SpatialHashIndex::build(payload.hit_points(), radius)?;
            debug!(key = %key, points = index.len(), cells = index.bucket_count(), "Built spatial index");
            entry.spatial_index = Some(index);
        }

        Ok(entry
            .spatial_index
            .as_ref()
            .and_then(|index| index.query_first(x, y, radius))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Values(Vec<f64>);

    impl TilePayload for Values {
        type Item = f64;

        fn values(&self) -> Vec<f64> {
            self.0.clone()
        }

        fn hit_points(&self) -> Vec<HitPoint<f64>> {
            self.0
                .iter()
                .enumerate()
                .map(|(i, &v)| HitPoint::new(10.0 + 40.0 * i as f64, 10.0, v))
                .collect()
        }
    }

    #[derive(Clone, Default)]
    struct Tickets(Arc<Mutex<Vec<FetchTicket>>>);

    impl Fetcher for Tickets {
        fn dispatch(&mut self, ticket: FetchTicket) {
            self.0.lock().unwrap().push(ticket);
        }
    }

    impl Tickets {
        fn take(&self) -> Vec<FetchTicket> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn cache() -> (TileCache<Vec<f64>, Values>, Tickets) {
        let tickets = Tickets::default();
        let transform = |raw: Vec<f64>| (!raw.is_empty()).then(|| Values(raw));
        let observer: Arc<dyn CacheObserver<Values>> = Arc::new(NoopObserver);
        let cache = TileCache::new(transform, tickets.clone(), observer);
        (cache, tickets)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> OnReady<Values>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |name: &str| -> OnReady<Values> {
            let log = Arc::clone(&log2);
            let name = name.to_string();
            Box::new(move |ready: TileReady<Values>| {
                let tag = match ready {
                    TileReady::Loaded { .. } => "loaded",
                    TileReady::Empty { .. } => "empty",
                    TileReady::Failed { .. } => "failed",
                };
                log.lock().unwrap().push(format!("{}:{}", name, tag));
            })
        };
        (log, make)
    }

    #[test]
    fn test_wrapped_requests_share_one_fetch() {
        let (mut cache, tickets) = cache();
        let (log, cb) = recorder();

        cache.request(TileCoord::new(2, -4, 1), TileHandle(1), cb("a")).unwrap();
        cache.request(TileCoord::new(2, 0, 1), TileHandle(2), cb("b")).unwrap();
        cache.request(TileCoord::new(2, 4, 1), TileHandle(3), cb("c")).unwrap();

        let dispatched = tickets.take();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].coord(), TileCoord::new(2, 0, 1));
        assert!(log.lock().unwrap().is_empty());

        cache.complete(dispatched[0], Ok(vec![1.0, 2.0, 3.0]));
        assert_eq!(*log.lock().unwrap(), vec!["a:loaded", "b:loaded", "c:loaded"]);
        assert_eq!(cache.extrema(), Some(ValueRange::new(1.0, 3.0)));
        assert_eq!(cache.stats().queued, 2);
    }

    #[test]
    fn test_hit_runs_synchronously() {
        let (mut cache, tickets) = cache();
        let (log, cb) = recorder();

        cache.request(TileCoord::new(1, 0, 0), TileHandle(1), cb("a")).unwrap();
        cache.complete(tickets.take()[0], Ok(vec![5.0]));
        cache.request(TileCoord::new(1, 2, 0), TileHandle(2), cb("b")).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:loaded", "b:loaded"]);
        assert!(tickets.take().is_empty());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_same_handle_not_duplicated() {
        let (mut cache, tickets) = cache();
        let (_log, cb) = recorder();
        let coord = TileCoord::new(3, 1, 1);

        cache.request(coord, TileHandle(9), cb("a")).unwrap();
        cache.complete(tickets.take()[0], Ok(vec![1.0]));
        cache.request(coord, TileHandle(9), cb("a")).unwrap();

        assert_eq!(cache.reference_count(&coord.canonical_key()), 1);
    }

    #[test]
    fn test_release_evicts_on_last_reference() {
        let (mut cache, tickets) = cache();
        let (_log, cb) = recorder();
        let a = TileCoord::new(2, -4, 1);
        let b = TileCoord::new(2, 0, 1);

        cache.request(a, TileHandle(1), cb("a")).unwrap();
        cache.request(b, TileHandle(2), cb("b")).unwrap();
        cache.complete(tickets.take()[0], Ok(vec![1.0]));

        assert_eq!(cache.release(&a.raw_key()), ReleaseOutcome::Retained { remaining: 1 });
        assert!(cache.contains(&b.canonical_key()));
        assert_eq!(cache.release(&b.raw_key()), ReleaseOutcome::Evicted);
        assert!(cache.is_empty());
        assert_eq!(cache.release(&b.raw_key()), ReleaseOutcome::NotFound);
    }

    #[test]
    fn test_release_unregistered_raw_is_noop() {
        let (mut cache, _tickets) = cache();
        let (_log, cb) = recorder();

        cache.request(TileCoord::new(2, 0, 1), TileHandle(1), cb("a")).unwrap();
        let stranger = TileCoord::new(2, 4, 1).raw_key();
        assert_eq!(cache.release(&stranger), ReleaseOutcome::NotFound);
        assert_eq!(cache.reference_count(&stranger.canonical()), 1);
    }

    #[test]
    fn test_empty_payload_releases_waiters() {
        let (mut cache, tickets) = cache();
        let (log, cb) = recorder();

        cache.request(TileCoord::new(1, 1, 1), TileHandle(1), cb("a")).unwrap();
        cache.complete(tickets.take()[0], Ok(vec![]));
        cache.request(TileCoord::new(1, 1, 1), TileHandle(2), cb("b")).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:empty", "b:empty"]);
        assert_eq!(cache.extrema(), None);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_failure_drops_entry_and_allows_retry() {
        let (mut cache, tickets) = cache();
        let (log, cb) = recorder();
        let coord = TileCoord::new(4, 3, 3);

        cache.request(coord, TileHandle(1), cb("a")).unwrap();
        cache.complete(tickets.take()[0], Err(FetchFailure::new("503")));
        assert_eq!(*log.lock().unwrap(), vec!["a:failed"]);
        assert!(!cache.contains(&coord.canonical_key()));

        cache.request(coord, TileHandle(1), cb("b")).unwrap();
        assert_eq!(tickets.take().len(), 1);
    }

    #[test]
    fn test_stale_completion_ignored_after_rerequest() {
        let (mut cache, tickets) = cache();
        let (log, cb) = recorder();
        let coord = TileCoord::new(2, 1, 1);

        cache.request(coord, TileHandle(1), cb("old")).unwrap();
        let first = tickets.take()[0];
        cache.release(&coord.raw_key());
        cache.request(coord, TileHandle(1), cb("new")).unwrap();
        let second = tickets.take()[0];
        assert_ne!(first.generation, second.generation);

        cache.complete(first, Ok(vec![100.0]));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(cache.extrema(), None);
        assert_eq!(cache.stats().stale_completions, 1);
        assert_eq!(cache.stats().discarded_waiters, 1);

        cache.complete(second, Ok(vec![2.0]));
        assert_eq!(*log.lock().unwrap(), vec!["new:loaded"]);
    }

    #[test]
    fn test_reset_clears_extrema() {
        let (mut cache, tickets) = cache();
        let (_log, cb) = recorder();

        cache.request(TileCoord::new(0, 0, 0), TileHandle(1), cb("a")).unwrap();
        cache.complete(tickets.take()[0], Ok(vec![1.0, 9.0]));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.extrema(), Some(ValueRange::new(1.0, 9.0)));

        cache.reset();
        assert_eq!(cache.extrema(), None);
    }

    #[test]
    fn test_hit_test_builds_index_lazily() {
        let (mut cache, tickets) = cache();
        let (_log, cb) = recorder();
        let coord = TileCoord::new(1, 0, 0);
        let key = coord.canonical_key();

        cache.request(coord, TileHandle(1), cb("a")).unwrap();
        assert_eq!(cache.hit_test(&key, 10.0, 10.0, 8.0).unwrap(), None);

        cache.complete(tickets.take()[0], Ok(vec![3.0, 4.0]));
        assert!(cache.get(&key).unwrap().spatial_index().is_none());

        let hit = cache.hit_test(&key, 52.0, 12.0, 8.0).unwrap().unwrap();
        assert_eq!(hit.item, 4.0);
        assert!(cache.get(&key).unwrap().spatial_index().is_some());
        assert!(cache.hit_test(&key, 200.0, 200.0, 8.0).unwrap().is_none());
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = CacheStats {
            requests: 4,
            hits: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 25.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
