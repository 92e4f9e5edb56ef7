//! Broadcast-backed event streams
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::broadcast;

/// A `BroadcastStream` wrapper similar to tokio's, except that it yields
/// items directly instead of `Result`s; lagged receivers end the stream
pub struct BroadcastStream<T> {
    inner: tokio_stream::wrappers::BroadcastStream<T>,
}

impl<T: 'static + Clone + Send> From<broadcast::Receiver<T>> for BroadcastStream<T> {
    fn from(value: broadcast::Receiver<T>) -> Self {
        Self {
            inner: value.into(),
        }
    }
}

impl<T: 'static + Clone + Send> Stream for BroadcastStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.get_mut().inner).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(Err(_))) => Poll::Ready(None),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A stream of events fanned out to any number of subscribers
#[derive(Clone)]
pub struct EventStream<E> {
    tx: broadcast::Sender<E>,
}

impl<E> EventStream<E>
where
    E: Clone,
{
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send an event to every current subscriber; events sent while nobody
    /// subscribes are dropped
    pub(crate) fn send(&self, event: E) {
        let _ = self.tx.send(event);
    }
}

impl<E> EventStream<E>
where
    E: Clone + Send + 'static,
{
    pub(crate) fn stream(&self) -> BroadcastStream<E> {
        self.tx.subscribe().into()
    }
}
