// ── Reactive state streams ──
//
// Subscription types for consuming committed snapshots: the cache state,
// the desired node set, the tree.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to a shared, immutable snapshot.
///
/// Provides both point-in-time access and reactive change notification
/// via [`changed`](Self::changed) or by converting to a `Stream`.
pub struct StateStream<T: Send + Sync + 'static> {
    current: Arc<T>,
    receiver: watch::Receiver<Arc<T>>,
}

impl<T: Send + Sync + 'static> StateStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<T>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time (or at the last `changed`).
    pub fn current(&self) -> &Arc<T> {
        &self.current
    }

    /// Get the latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the publisher has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The stream yields the current snapshot first.
    pub fn into_stream(self) -> SnapshotStream<T> {
        SnapshotStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct SnapshotStream<T: Send + Sync + 'static> {
    inner: WatchStream<Arc<T>>,
}

impl<T: Send + Sync + 'static> Stream for SnapshotStream<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn changed_tracks_latest() {
        let (tx, rx) = watch::channel(Arc::new(1_u32));
        let mut stream = StateStream::new(rx);
        assert_eq!(**stream.current(), 1);

        tx.send_replace(Arc::new(2));
        assert_eq!(*stream.changed().await.unwrap(), 2);
        assert_eq!(**stream.current(), 2);

        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_current_first() {
        let (tx, rx) = watch::channel(Arc::new("a"));
        let mut stream = StateStream::new(rx).into_stream();
        assert_eq!(*stream.next().await.unwrap(), "a");

        tx.send_replace(Arc::new("b"));
        assert_eq!(*stream.next().await.unwrap(), "b");
    }
}
