//! Tokio service owning a [`TileCache`] on a single task.
//!
//! Every mutation goes through one command channel, and fetch completions
//! re-enter through a second channel drained by the same task, so a waiter
//! drain never interleaves with a `request` or `release`. Fetches themselves
//! run as spawned tasks, bounded by a semaphore and an optional timeout.

use std::sync::Arc;
use std::time::Duration;

use tile_common::{CanonicalKey, RawKey, TileCoord, TileError, TileResult};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ReleaseOutcome, TileCache, TileHandle, TileReady};
use crate::config::CacheConfig;
use crate::extrema::ValueRange;
use crate::fetch::{FetchFailure, FetchTicket, Fetcher, TileSource};
use crate::observer::CacheObserver;
use crate::payload::{TilePayload, TileTransform};
use crate::spatial::HitPoint;

/// Read-only view of an entry handed out by the service.
#[derive(Debug)]
pub struct EntryInfo<P> {
    pub key: CanonicalKey,
    pub pending: bool,
    pub payload: Option<Arc<P>>,
    pub references: usize,
    pub has_spatial_index: bool,
}

type Reply<T> = oneshot::Sender<T>;

/// Everything the service task receives from handles.
enum Message<P: TilePayload> {
    Command(Command<P>),
    Shutdown { reply: Reply<()> },
}

enum Command<P: TilePayload> {
    Request {
        raw: TileCoord,
        handle: TileHandle,
        reply: Reply<TileReady<P>>,
    },
    Release {
        raw: RawKey,
        reply: Reply<ReleaseOutcome>,
    },
    Clear {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    HitTest {
        key: CanonicalKey,
        x: f64,
        y: f64,
        radius: f64,
        reply: Reply<TileResult<Option<HitPoint<P::Item>>>>,
    },
    Lookup {
        key: CanonicalKey,
        reply: Reply<Option<EntryInfo<P>>>,
    },
    Extrema {
        reply: Reply<Option<ValueRange>>,
    },
    Stats {
        reply: Reply<CacheStats>,
    },
}

struct Completion<R> {
    ticket: FetchTicket,
    result: Result<R, FetchFailure>,
}

/// Runs each dispatched fetch as its own task against a [`TileSource`].
struct SourceFetcher<S: TileSource> {
    source: Arc<S>,
    limiter: Arc<Semaphore>,
    timeout: Option<Duration>,
    completions: mpsc::UnboundedSender<Completion<S::Raw>>,
}

impl<S: TileSource> Fetcher for SourceFetcher<S> {
    fn dispatch(&mut self, ticket: FetchTicket) {
        let source = Arc::clone(&self.source);
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.timeout;
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let result = match limiter.acquire_owned().await {
                Ok(_permit) => {
                    let fetch = source.fetch(ticket.coord());
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, fetch)
                            .await
                            .unwrap_or_else(|_| {
                                Err(FetchFailure::new(format!(
                                    "Timed out after {}ms",
                                    limit.as_millis()
                                )))
                            }),
                        None => fetch.await,
                    }
                }
                Err(_) => Err(FetchFailure::new("Fetch limiter closed")),
            };

            // The service is gone if this fails; nothing left to notify.
            let _ = completions.send(Completion { ticket, result });
        });
    }
}

/// Spawns the cache task.
pub struct TileCacheService;

impl TileCacheService {
    /// Start a cache task fetching from `source` and return a handle to it.
    ///
    /// Fails without spawning anything if `config` does not validate. Must be
    /// called from within a tokio runtime.
    pub fn spawn<S, P, T>(
        config: &CacheConfig,
        transform: T,
        source: Arc<S>,
        observer: Arc<dyn CacheObserver<P>>,
    ) -> anyhow::Result<TileCacheHandle<P>>
    where
        S: TileSource,
        P: TilePayload,
        T: TileTransform<S::Raw, P> + 'static,
    {
        config.validate()?;
        let (tx, commands) = mpsc::channel(config.command_buffer);
        let (completion_tx, completions) = mpsc::unbounded_channel();

        let fetcher = SourceFetcher {
            source,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            timeout: config.fetch_timeout(),
            completions: completion_tx,
        };
        let cache = TileCache::new(transform, fetcher, observer);

        info!(
            max_concurrent_fetches = config.max_concurrent_fetches,
            fetch_timeout_ms = ?config.fetch_timeout_ms,
            "Starting tile cache service"
        );
        tokio::spawn(run(cache, commands, completions));

        Ok(TileCacheHandle { tx })
    }
}

async fn run<R, P>(
    mut cache: TileCache<R, P>,
    mut messages: mpsc::Receiver<Message<P>>,
    mut completions: mpsc::UnboundedReceiver<Completion<R>>,
) where
    R: Send + 'static,
    P: TilePayload,
{
    loop {
        tokio::select! {
            // Finish in-flight work before taking new commands.
            biased;

            Some(done) = completions.recv() => {
                cache.complete(done.ticket, done.result);
            }
            message = messages.recv() => match message {
                Some(Message::Command(command)) => handle_command(&mut cache, command),
                Some(Message::Shutdown { reply }) => {
                    let _ = reply.send(());
                    break;
                }
                None => break,
            },
        }
    }

    let stats = cache.stats();
    info!(
        entries = cache.len(),
        fetches = stats.fetches,
        hits = stats.hits,
        evictions = stats.evictions,
        "Tile cache service stopped"
    );
}

fn handle_command<R, P: TilePayload>(cache: &mut TileCache<R, P>, command: Command<P>) {
    match command {
        Command::Request { raw, handle, reply } => {
            let registered = cache.request(
                raw,
                handle,
                Box::new(move |ready| {
                    // Requester stopped waiting; the reference stays until release.
                    let _ = reply.send(ready);
                }),
            );
            if let Err(err) = registered {
                warn!(raw = %raw, error = %err, "Rejected tile request");
            }
        }
        Command::Release { raw, reply } => {
            let _ = reply.send(cache.release(&raw));
        }
        Command::Clear { reply } => {
            cache.clear();
            let _ = reply.send(());
        }
        Command::Reset { reply } => {
            cache.reset();
            let _ = reply.send(());
        }
        Command::HitTest {
            key,
            x,
            y,
            radius,
            reply,
        } => {
            let _ = reply.send(cache.hit_test(&key, x, y, radius));
        }
        Command::Lookup { key, reply } => {
            let info = cache.get(&key).map(|entry| EntryInfo {
                key,
                pending: entry.is_pending(),
                payload: entry.payload().cloned(),
                references: entry.references().len(),
                has_spatial_index: entry.spatial_index().is_some(),
            });
            let _ = reply.send(info);
        }
        Command::Extrema { reply } => {
            let _ = reply.send(cache.extrema());
        }
        Command::Stats { reply } => {
            let _ = reply.send(cache.stats().clone());
        }
    }
}

/// Cloneable handle to a running cache service.
pub struct TileCacheHandle<P: TilePayload> {
    tx: mpsc::Sender<Message<P>>,
}

impl<P: TilePayload> Clone for TileCacheHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: TilePayload> TileCacheHandle<P> {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command<P>) -> TileResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Command(make(reply))).await?;
        rx.await
            .map_err(|_| TileError::ServiceUnavailable("tile cache service dropped reply".into()))
    }

    async fn send(&self, message: Message<P>) -> TileResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TileError::ServiceUnavailable("tile cache service stopped".into()))
    }

    /// Register a raw tile and get a receiver for its data.
    ///
    /// The receiver errors if the entry is released or cleared before it
    /// resolves. Zooms past [`MAX_ZOOM`](tile_common::MAX_ZOOM) are rejected
    /// without contacting the service.
    pub async fn request(
        &self,
        raw: TileCoord,
        handle: TileHandle,
    ) -> TileResult<oneshot::Receiver<TileReady<P>>> {
        let raw = TileCoord::checked(raw.z, raw.x, raw.y)?;
        let (reply, rx) = oneshot::channel();
        self.send(Message::Command(Command::Request { raw, handle, reply }))
            .await?;
        Ok(rx)
    }

    /// Register a raw tile and wait for its data.
    pub async fn load(&self, raw: TileCoord, handle: TileHandle) -> TileResult<TileReady<P>> {
        let rx = self.request(raw, handle).await?;
        rx.await.map_err(|_| {
            debug!(raw = %raw, "Tile request discarded before it resolved");
            TileError::Cancelled
        })
    }

    /// Drop a raw tile's reference.
    pub async fn release(&self, raw: TileCoord) -> TileResult<ReleaseOutcome> {
        let raw = raw.raw_key();
        self.call(|reply| Command::Release { raw, reply }).await
    }

    /// Drop every entry without eviction notifications.
    pub async fn clear(&self) -> TileResult<()> {
        self.call(|reply| Command::Clear { reply }).await
    }

    /// Drop every entry and the running extrema.
    pub async fn reset(&self) -> TileResult<()> {
        self.call(|reply| Command::Reset { reply }).await
    }

    /// Hit-test a canonical tile at a tile-local pixel position.
    pub async fn hit_test(
        &self,
        key: CanonicalKey,
        x: f64,
        y: f64,
        radius: f64,
    ) -> TileResult<Option<HitPoint<P::Item>>> {
        self.call(|reply| Command::HitTest {
            key,
            x,
            y,
            radius,
            reply,
        })
        .await?
    }

    pub async fn lookup(&self, key: CanonicalKey) -> TileResult<Option<EntryInfo<P>>> {
        self.call(|reply| Command::Lookup { key, reply }).await
    }

    pub async fn extrema(&self) -> TileResult<Option<ValueRange>> {
        self.call(|reply| Command::Extrema { reply }).await
    }

    pub async fn stats(&self) -> TileResult<CacheStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Stop the service. Pending waiters are dropped.
    pub async fn shutdown(&self) -> TileResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Shutdown { reply }).await?;
        rx.await
            .map_err(|_| TileError::ServiceUnavailable("tile cache service dropped reply".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tile_common::MAX_ZOOM;

    struct Doubling {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TileSource for Doubling {
        type Raw = Vec<f64>;

        async fn fetch(&self, coord: TileCoord) -> Result<Vec<f64>, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![coord.x as f64 * 2.0, coord.y as f64 * 2.0])
        }
    }

    struct Sum(f64);

    impl TilePayload for Sum {
        type Item = ();

        fn values(&self) -> Vec<f64> {
            vec![self.0]
        }
    }

    #[tokio::test]
    async fn test_load_and_release() {
        let source = Arc::new(Doubling {
            calls: AtomicUsize::new(0),
        });
        let observer: Arc<dyn CacheObserver<Sum>> = Arc::new(NoopObserver);
        let handle = TileCacheService::spawn(
            &CacheConfig::default(),
            |raw: Vec<f64>| Some(Sum(raw.iter().sum())),
            Arc::clone(&source),
            observer,
        )
        .unwrap();

        let ready = handle.load(TileCoord::new(3, -1, 2), TileHandle(1)).await.unwrap();
        assert_eq!(ready.payload().unwrap().0, 18.0);
        assert_eq!(ready.key().coord(), TileCoord::new(3, 7, 2));

        let ready = handle.load(TileCoord::new(3, 7, 2), TileHandle(2)).await.unwrap();
        assert_eq!(ready.payload().unwrap().0, 18.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            handle.release(TileCoord::new(3, -1, 2)).await.unwrap(),
            ReleaseOutcome::Retained { remaining: 1 }
        );
        assert_eq!(
            handle.release(TileCoord::new(3, 7, 2)).await.unwrap(),
            ReleaseOutcome::Evicted
        );
        assert_eq!(handle.stats().await.unwrap().evictions, 1);

        handle.shutdown().await.unwrap();
        assert!(matches!(
            handle.extrema().await,
            Err(TileError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let source = Arc::new(Doubling {
            calls: AtomicUsize::new(0),
        });
        for config in [
            CacheConfig {
                command_buffer: 0,
                ..Default::default()
            },
            CacheConfig {
                max_concurrent_fetches: 0,
                ..Default::default()
            },
        ] {
            let observer: Arc<dyn CacheObserver<Sum>> = Arc::new(NoopObserver);
            let spawned = TileCacheService::spawn(
                &config,
                |raw: Vec<f64>| Some(Sum(raw.iter().sum())),
                Arc::clone(&source),
                observer,
            );
            assert!(spawned.is_err());
        }
    }

    #[tokio::test]
    async fn test_deep_zoom_rejected_before_reaching_service() {
        let source = Arc::new(Doubling {
            calls: AtomicUsize::new(0),
        });
        let observer: Arc<dyn CacheObserver<Sum>> = Arc::new(NoopObserver);
        let handle = TileCacheService::spawn(
            &CacheConfig::default(),
            |raw: Vec<f64>| Some(Sum(raw.iter().sum())),
            Arc::clone(&source),
            observer,
        )
        .unwrap();

        let result = handle.load(TileCoord::new(MAX_ZOOM + 1, -1, 5), TileHandle(1)).await;
        assert_eq!(
            result.err(),
            Some(TileError::InvalidZoom { zoom: MAX_ZOOM + 1, max: MAX_ZOOM })
        );
        assert_eq!(handle.stats().await.unwrap().requests, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
