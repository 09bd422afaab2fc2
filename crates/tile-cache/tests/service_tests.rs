//! Tests for the tokio cache service against gated tile sources.

use std::sync::Arc;
use std::time::Duration;

use test_utils::{series_transform, GatedSource, SeriesPayload};
use tile_cache::{
    CacheConfig, CacheEvent, CacheObserver, ChannelObserver, FetchFailure, NoopObserver,
    ReleaseOutcome, TileCacheHandle, TileCacheService, TileHandle, TileReady, ValueRange,
};
use tile_common::{TileCoord, TileError};
use tokio_test::{assert_err, assert_ok};

fn spawn_with(
    config: &CacheConfig,
    source: &Arc<GatedSource>,
    observer: Arc<dyn CacheObserver<SeriesPayload>>,
) -> TileCacheHandle<SeriesPayload> {
    TileCacheService::spawn(config, series_transform, Arc::clone(source), observer).unwrap()
}

fn spawn(source: &Arc<GatedSource>) -> TileCacheHandle<SeriesPayload> {
    let observer: Arc<dyn CacheObserver<SeriesPayload>> = Arc::new(NoopObserver);
    spawn_with(&CacheConfig::default(), source, observer)
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_concurrent_wrapped_requests_fetch_once() {
    let source = GatedSource::new(vec![1.0, 2.0, 3.0]);
    let cache = spawn(&source);

    let a = cache.request(TileCoord::new(2, -4, 1), TileHandle(1)).await.unwrap();
    let b = cache.request(TileCoord::new(2, 0, 1), TileHandle(2)).await.unwrap();
    let c = cache.request(TileCoord::new(2, 8, 1), TileHandle(3)).await.unwrap();

    source.wait_for_calls(1).await;
    let key = TileCoord::new(2, 0, 1).canonical_key();
    let info = cache.lookup(key).await.unwrap().unwrap();
    assert!(info.pending);
    assert_eq!(info.references, 3);

    source.open(1);
    for rx in [a, b, c] {
        let ready = rx.await.unwrap();
        assert_eq!(ready.payload().unwrap().values, vec![1.0, 2.0, 3.0]);
        assert_eq!(*ready.key(), key);
    }

    assert_eq!(source.calls(), vec![TileCoord::new(2, 0, 1)]);
    assert_eq!(cache.extrema().await.unwrap(), Some(ValueRange::new(1.0, 3.0)));
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.queued, 2);
}

#[tokio::test]
async fn test_resolved_entry_answers_without_fetch() {
    let source = GatedSource::open_with(vec![5.0]);
    let cache = spawn(&source);

    assert_ok!(cache.load(TileCoord::new(3, 1, 1), TileHandle(1)).await);
    let ready = assert_ok!(cache.load(TileCoord::new(3, 9, 1), TileHandle(2)).await);

    assert!(matches!(ready, TileReady::Loaded { .. }));
    assert_eq!(source.calls().len(), 1);
    assert_eq!(cache.stats().await.unwrap().hits, 1);
}

// ============================================================================
// Cancellation and eviction
// ============================================================================

#[tokio::test]
async fn test_release_before_resolve_cancels_waiter() {
    let source = GatedSource::new(vec![1.0]);
    let cache = spawn(&source);
    let coord = TileCoord::new(4, 3, 3);

    let loader = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.load(coord, TileHandle(1)).await })
    };
    source.wait_for_calls(1).await;

    assert_eq!(cache.release(coord).await.unwrap(), ReleaseOutcome::Evicted);
    let result = loader.await.unwrap();
    assert!(matches!(result, Err(TileError::Cancelled)));

    // The late completion must not repopulate anything.
    source.open(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.lookup(coord.canonical_key()).await.unwrap().is_none());
    assert_eq!(cache.extrema().await.unwrap(), None);
    assert_eq!(cache.stats().await.unwrap().stale_completions, 1);
}

#[tokio::test]
async fn test_evicted_tile_is_fetched_again() {
    let source = GatedSource::open_with(vec![2.0]);
    let cache = spawn(&source);
    let coord = TileCoord::new(1, 1, 0);

    assert_ok!(cache.load(coord, TileHandle(1)).await);
    assert_eq!(cache.release(coord).await.unwrap(), ReleaseOutcome::Evicted);
    assert_ok!(cache.load(coord, TileHandle(1)).await);

    assert_eq!(source.calls().len(), 2);
}

#[tokio::test]
async fn test_shutdown_drops_pending_waiters() {
    let source = GatedSource::new(vec![1.0]);
    let cache = spawn(&source);

    let rx = cache.request(TileCoord::new(2, 2, 2), TileHandle(1)).await.unwrap();
    source.wait_for_calls(1).await;
    cache.shutdown().await.unwrap();

    assert_err!(rx.await);
    assert!(matches!(
        cache.stats().await,
        Err(TileError::ServiceUnavailable(_))
    ));
}

// ============================================================================
// Fetch limits and failures
// ============================================================================

#[tokio::test]
async fn test_concurrent_fetches_are_bounded() {
    let source = GatedSource::new(vec![1.0]);
    let config = CacheConfig {
        max_concurrent_fetches: 1,
        ..Default::default()
    };
    let observer: Arc<dyn CacheObserver<SeriesPayload>> = Arc::new(NoopObserver);
    let cache = spawn_with(&config, &source, observer);

    let mut receivers = Vec::new();
    for x in 0..3 {
        receivers.push(cache.request(TileCoord::new(3, x, 0), TileHandle(x as u64)).await.unwrap());
    }

    source.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.calls().len(), 1);

    source.open_all();
    for rx in receivers {
        assert!(rx.await.unwrap().payload().is_some());
    }
    assert_eq!(source.calls().len(), 3);
}

#[tokio::test]
async fn test_fetch_timeout_fails_waiters() {
    let source = GatedSource::new(vec![1.0]);
    let config = CacheConfig {
        fetch_timeout_ms: Some(20),
        ..Default::default()
    };
    let (observer, mut events) = ChannelObserver::<SeriesPayload>::new();
    let observer: Arc<dyn CacheObserver<SeriesPayload>> = Arc::new(observer);
    let cache = spawn_with(&config, &source, observer);
    let coord = TileCoord::new(5, 1, 1);

    let ready = cache.load(coord, TileHandle(1)).await.unwrap();
    match ready {
        TileReady::Failed { key, error } => {
            assert_eq!(key, coord.canonical_key());
            assert!(error.message.contains("Timed out"));
        }
        other => panic!("expected failure, got {:?}", other.key()),
    }

    assert!(matches!(
        events.recv().await,
        Some(CacheEvent::FetchFailed { .. })
    ));
    assert!(cache.lookup(coord.canonical_key()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_fetch_is_retried_on_next_request() {
    let source = GatedSource::open_with(vec![7.0]);
    let coord = TileCoord::new(2, 3, 0);
    source.respond(coord, Err(FetchFailure::new("backend unavailable")));
    let cache = spawn(&source);

    let ready = cache.load(coord, TileHandle(1)).await.unwrap();
    assert!(matches!(ready, TileReady::Failed { .. }));

    source.respond(coord, Ok(vec![7.0]));
    let ready = cache.load(coord, TileHandle(1)).await.unwrap();
    assert_eq!(ready.payload().unwrap().values, vec![7.0]);
    assert_eq!(source.calls().len(), 2);
}

// ============================================================================
// Notifications and hit testing
// ============================================================================

#[tokio::test]
async fn test_observer_sees_extrema_before_loaded() {
    let source = GatedSource::open_with(vec![-1.0, 4.0]);
    let (observer, mut events) = ChannelObserver::<SeriesPayload>::new();
    let observer: Arc<dyn CacheObserver<SeriesPayload>> = Arc::new(observer);
    let cache = spawn_with(&CacheConfig::default(), &source, observer);
    let coord = TileCoord::new(1, 0, 1);

    assert_ok!(cache.load(coord, TileHandle(1)).await);
    assert_eq!(cache.release(coord).await.unwrap(), ReleaseOutcome::Evicted);

    assert!(matches!(
        events.recv().await,
        Some(CacheEvent::ExtremaChanged(r)) if r == ValueRange::new(-1.0, 4.0)
    ));
    assert!(matches!(events.recv().await, Some(CacheEvent::Loaded { .. })));
    assert!(matches!(
        events.recv().await,
        Some(CacheEvent::Evicted { payload: Some(_), .. })
    ));
}

#[tokio::test]
async fn test_hit_test_through_service() {
    let source = GatedSource::open_with(vec![1.0, 2.0]);
    let cache = spawn(&source);
    let coord = TileCoord::new(2, -1, 0);
    let key = coord.canonical_key();

    assert_ok!(cache.load(coord, TileHandle(1)).await);
    assert!(!cache.lookup(key).await.unwrap().unwrap().has_spatial_index);

    let hit = cache.hit_test(key, 48.0, 12.0, 8.0).await.unwrap();
    assert_eq!(hit.map(|p| p.item), Some(1));
    assert!(cache.lookup(key).await.unwrap().unwrap().has_spatial_index);

    let miss = cache.hit_test(key, 128.0, 128.0, 8.0).await.unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_hit_test_rejects_bad_radius() {
    let source = GatedSource::open_with(vec![1.0]);
    let cache = spawn(&source);
    let coord = TileCoord::new(1, 0, 0);
    let key = coord.canonical_key();

    assert_ok!(cache.load(coord, TileHandle(1)).await);
    assert!(matches!(
        cache.hit_test(key, 10.0, 10.0, 0.0).await,
        Err(TileError::InvalidRadius(_))
    ));

    // Still rejected once the index exists.
    assert_ok!(cache.hit_test(key, 10.0, 10.0, 8.0).await);
    assert!(cache.lookup(key).await.unwrap().unwrap().has_spatial_index);
    assert!(matches!(
        cache.hit_test(key, 16.0, 12.0, -8.0).await,
        Err(TileError::InvalidRadius(_))
    ));
}

#[tokio::test]
async fn test_reset_clears_extrema_and_entries() {
    let source = GatedSource::open_with(vec![3.0, 6.0]);
    let cache = spawn(&source);

    assert_ok!(cache.load(TileCoord::new(0, 0, 0), TileHandle(1)).await);
    assert!(cache.extrema().await.unwrap().is_some());

    cache.reset().await.unwrap();
    assert_eq!(cache.extrema().await.unwrap(), None);
    assert!(cache
        .lookup(TileCoord::new(0, 0, 0).canonical_key())
        .await
        .unwrap()
        .is_none());
}
