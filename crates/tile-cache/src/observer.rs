//! Notifications emitted by the cache.

use std::sync::Arc;

use tile_common::CanonicalKey;
use tokio::sync::mpsc;

use crate::extrema::ValueRange;
use crate::fetch::FetchFailure;

/// Receives cache notifications. Every method defaults to a no-op.
///
/// Called synchronously from inside the cache; implementations must not call
/// back into it.
pub trait CacheObserver<P>: Send + Sync {
    /// First successful load of an entry. Fires after its waiters ran.
    fn loaded(&self, _key: &CanonicalKey, _payload: &Arc<P>) {}

    /// The last raw tile referencing an entry was released.
    fn evicted(&self, _key: &CanonicalKey, _payload: Option<&Arc<P>>) {}

    /// A load widened the running value range.
    fn extrema_changed(&self, _range: ValueRange) {}

    /// A fetch failed and its entry was dropped.
    fn fetch_failed(&self, _key: &CanonicalKey, _error: &FetchFailure) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<P> CacheObserver<P> for NoopObserver {}

/// A cache notification as a value.
#[derive(Debug, Clone)]
pub enum CacheEvent<P> {
    Loaded {
        key: CanonicalKey,
        payload: Arc<P>,
    },
    Evicted {
        key: CanonicalKey,
        payload: Option<Arc<P>>,
    },
    ExtremaChanged(ValueRange),
    FetchFailed {
        key: CanonicalKey,
        error: FetchFailure,
    },
}

/// Forwards notifications over a channel, e.g. to a UI task.
pub struct ChannelObserver<P> {
    tx: mpsc::UnboundedSender<CacheEvent<P>>,
}

impl<P> ChannelObserver<P> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheEvent<P>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: CacheEvent<P>) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl<P: Send + Sync> CacheObserver<P> for ChannelObserver<P> {
    fn loaded(&self, key: &CanonicalKey, payload: &Arc<P>) {
        self.send(CacheEvent::Loaded {
            key: *key,
            payload: Arc::clone(payload),
        });
    }

    fn evicted(&self, key: &CanonicalKey, payload: Option<&Arc<P>>) {
        self.send(CacheEvent::Evicted {
            key: *key,
            payload: payload.cloned(),
        });
    }

    fn extrema_changed(&self, range: ValueRange) {
        self.send(CacheEvent::ExtremaChanged(range));
    }

    fn fetch_failed(&self, key: &CanonicalKey, error: &FetchFailure) {
        self.send(CacheEvent::FetchFailed {
            key: *key,
            error: error.clone(),
        });
    }
}
