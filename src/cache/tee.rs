//! Splitting one response body between the client and the cache writer.
//!
//! The client side drives the upstream body. Each chunk is handed to the
//! cache side through a bounded channel with `try_send`, so a slow disk can
//! only ever cost the cache copy, never the client relay.
//!
//! Completion is signalled as soon as the upstream body reports
//! `is_end_stream`. A length-framed response is dropped by the server right
//! after its last byte is written, so the relay may never be polled to the end.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::{Body, Bytes};
use futures_util::stream::{self, Stream};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::CacheError;

enum TeeEvent {
    Chunk(Bytes),
    /// Upstream body ended cleanly; the copy is complete.
    Done,
}

/// Cache-side half of a [`tee`].
pub struct CacheFeed {
    rx: mpsc::Receiver<TeeEvent>,
}

impl CacheFeed {
    /// Chunks in order, ending cleanly only if the whole body was relayed.
    ///
    /// Yields [`CacheError::Abandoned`] when the relay stopped early, hit an
    /// upstream error, or outran the buffer.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, CacheError>> + Send + 'static {
        stream::unfold(Some(self.rx), |rx| async move {
            let mut rx = rx?;
            match rx.recv().await {
                Some(TeeEvent::Chunk(chunk)) => Some((Ok(chunk), Some(rx))),
                Some(TeeEvent::Done) => None,
                None => Some((Err(CacheError::Abandoned), None)),
            }
        })
    }
}

/// Client-side half of a [`tee`]. Relays frames untouched.
struct TeeBody {
    inner: Body,
    tx: Option<mpsc::Sender<TeeEvent>>,
}

impl TeeBody {
    fn finish(&mut self) {
        if let Some(sender) = self.tx.take() {
            let _ = sender.try_send(TeeEvent::Done);
        }
    }
}

impl HttpBody for TeeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    this.tx = this.tx.take().and_then(|sender| forward_chunk(sender, chunk));
                }
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                // dropping the sender without Done abandons the cache copy
                this.tx = None;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Split `body` into a client body and a cache feed holding at most
/// `capacity` unwritten chunks.
pub fn tee(body: Body, capacity: usize) -> (Body, CacheFeed) {
    // One extra slot is reserved for the completion marker.
    let (tx, rx) = mpsc::channel(capacity.max(1) + 1);

    let mut relay = TeeBody {
        inner: body,
        tx: Some(tx),
    };
    if relay.inner.is_end_stream() {
        relay.finish();
    }

    (Body::new(relay), CacheFeed { rx })
}

fn forward_chunk(sender: mpsc::Sender<TeeEvent>, chunk: &Bytes) -> Option<mpsc::Sender<TeeEvent>> {
    if sender.capacity() <= 1 {
        tracing::debug!("Cache writer fell behind the client, abandoning cache copy");
        return None;
    }
    match sender.try_send(TeeEvent::Chunk(chunk.clone())) {
        Ok(()) => Some(sender),
        Err(TrySendError::Full(_)) => {
            tracing::debug!("Cache writer fell behind the client, abandoning cache copy");
            None
        }
        Err(TrySendError::Closed(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::collections::VecDeque;

    /// Known-length body that reports its end with the last chunk, the way
    /// hyper's `Incoming` does for a `Content-Length` response.
    struct LengthFramed(VecDeque<Bytes>);

    impl HttpBody for LengthFramed {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, std::io::Error>>> {
            Poll::Ready(self.0.pop_front().map(|chunk| Ok(Frame::data(chunk))))
        }

        fn is_end_stream(&self) -> bool {
            self.0.is_empty()
        }

        fn size_hint(&self) -> SizeHint {
            SizeHint::with_exact(self.0.iter().map(|c| c.len() as u64).sum())
        }
    }

    fn length_framed(parts: &[&'static str]) -> Body {
        Body::new(LengthFramed(
            parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect(),
        ))
    }

    fn chunked(parts: &[&'static str]) -> Body {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        Body::from_stream(stream::iter(chunks))
    }

    async fn drain(feed: CacheFeed) -> (Vec<u8>, Option<CacheError>) {
        let mut bytes = Vec::new();
        let mut stream = Box::pin(feed.into_stream());
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(err) => return (bytes, Some(err)),
            }
        }
        (bytes, None)
    }

    #[tokio::test]
    async fn both_sides_see_the_whole_body() {
        let (client, feed) = tee(chunked(&["hel", "lo ", "world"]), 8);

        let relayed = axum::body::to_bytes(client, usize::MAX).await.unwrap();
        let (cached, err) = drain(feed).await;

        assert_eq!(&relayed[..], b"hello world");
        assert_eq!(cached, b"hello world");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn client_disconnect_abandons_cache_copy() {
        let (client, feed) = tee(chunked(&["first", "second"]), 8);

        let mut data = client.into_data_stream();
        let first = data.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"first");
        drop(data);

        let (cached, err) = drain(feed).await;
        assert_eq!(cached, b"first");
        assert!(matches!(err, Some(CacheError::Abandoned)));
    }

    #[tokio::test]
    async fn slow_writer_never_blocks_client() {
        // Nobody reads the feed until the client has the full body.
        let (client, feed) = tee(chunked(&["a", "b", "c", "d"]), 1);

        let relayed = axum::body::to_bytes(client, usize::MAX).await.unwrap();
        assert_eq!(&relayed[..], b"abcd");

        let (cached, err) = drain(feed).await;
        assert_eq!(cached, b"a");
        assert!(matches!(err, Some(CacheError::Abandoned)));
    }

    #[tokio::test]
    async fn upstream_error_abandons_cache_copy() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "origin reset")),
        ];
        let (client, feed) = tee(Body::from_stream(stream::iter(chunks)), 8);

        assert!(axum::body::to_bytes(client, usize::MAX).await.is_err());
        let (_, err) = drain(feed).await;
        assert!(matches!(err, Some(CacheError::Abandoned)));
    }

    #[tokio::test]
    async fn dropped_feed_leaves_relay_untouched() {
        let (client, feed) = tee(chunked(&["x", "y"]), 8);
        drop(feed);

        let relayed = axum::body::to_bytes(client, usize::MAX).await.unwrap();
        assert_eq!(&relayed[..], b"xy");
    }

    #[tokio::test]
    async fn length_framed_body_completes_without_final_poll() {
        let (client, feed) = tee(length_framed(&["hel", "lo"]), 8);
        assert_eq!(client.size_hint().exact(), Some(5));

        // Read exactly the advertised bytes, then drop, as the server does.
        let mut data = client.into_data_stream();
        let mut relayed = Vec::new();
        for _ in 0..2 {
            relayed.extend_from_slice(&data.next().await.unwrap().unwrap());
        }
        drop(data);

        let (cached, err) = drain(feed).await;
        assert_eq!(relayed, b"hello");
        assert_eq!(cached, b"hello");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn empty_length_framed_body_completes_immediately() {
        let (client, feed) = tee(length_framed(&[]), 8);
        assert!(client.is_end_stream());
        drop(client);

        let (cached, err) = drain(feed).await;
        assert!(cached.is_empty());
        assert!(err.is_none());
    }
}
