//! Demand-driven inbound stream.
//!
//! The consumer side ([`Inbound`]) asks for one item at a time by handing a
//! oneshot reply slot to the producer side ([`InboundSender`]). The producer
//! only reads from the transport once such a [`Demand`] arrives, so a consumer
//! that stops polling stops the reads as well and nothing piles up in memory.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};

use crate::protocol::ChannelError;

type Reply<T> = Result<Option<T>, ChannelError>;

/// Creates a connected producer/consumer pair.
pub fn inbound<T>() -> (InboundSender<T>, Inbound<T>) {
    // buffer 0: every sender owns exactly one slot, so at most one demand is in flight
    let (signal, receiver) = mpsc::channel(0);
    (InboundSender { receiver }, Inbound { signal, receiving: None, size_hint: SizeHint::new(), done: false })
}

pub struct Inbound<T> {
    signal: mpsc::Sender<oneshot::Sender<Reply<T>>>,
    receiving: Option<oneshot::Receiver<Reply<T>>>,
    size_hint: SizeHint,
    done: bool,
}

impl<T> Inbound<T> {
    /// Records the size announced by the peer; only used as a body size hint.
    #[must_use]
    pub fn with_size_hint(mut self, size_hint: SizeHint) -> Self {
        self.size_hint = size_hint;
        self
    }

    pub fn is_terminated(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        self.receiving.take();
        self.signal.disconnect();
    }
}

impl Inbound<Bytes> {
    /// Collects every remaining chunk into one buffer.
    pub async fn aggregate(mut self) -> Result<Bytes, ChannelError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl<T> Stream for Inbound<T> {
    type Item = Result<T, ChannelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(receiver) = &mut this.receiving {
                let reply = ready!(receiver.poll_unpin(cx));
                this.receiving.take();
                return match reply {
                    Ok(Ok(Some(item))) => Poll::Ready(Some(Ok(item))),
                    Ok(Ok(None)) => {
                        this.finish();
                        Poll::Ready(None)
                    }
                    Ok(Err(e)) => {
                        this.finish();
                        Poll::Ready(Some(Err(e)))
                    }
                    // producer went away without answering: the connection is gone
                    Err(_canceled) => {
                        this.finish();
                        Poll::Ready(Some(Err(ChannelError::Closed)))
                    }
                };
            }

            if ready!(this.signal.poll_ready_unpin(cx)).is_err() {
                this.finish();
                return Poll::Ready(Some(Err(ChannelError::Closed)));
            }

            let (tx, rx) = oneshot::channel();
            if this.signal.start_send(tx).is_err() {
                this.finish();
                return Poll::Ready(Some(Err(ChannelError::Closed)));
            }
            this.receiving = Some(rx);
        }
    }
}

impl Body for Inbound<Bytes> {
    type Data = Bytes;
    type Error = ChannelError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        self.size_hint.clone()
    }
}

impl<T> fmt::Debug for Inbound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound").field("done", &self.done).field("waiting", &self.receiving.is_some()).finish()
    }
}

pub struct InboundSender<T> {
    receiver: mpsc::Receiver<oneshot::Sender<Reply<T>>>,
}

impl<T> InboundSender<T> {
    /// Waits until the consumer asks for the next item.
    ///
    /// Returns `None` once the consumer has been dropped.
    pub async fn demand(&mut self) -> Option<Demand<T>> {
        self.receiver.next().await.map(|reply| Demand { reply })
    }
}

impl<T> fmt::Debug for InboundSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InboundSender")
    }
}

/// One outstanding request for an item.
pub struct Demand<T> {
    reply: oneshot::Sender<Reply<T>>,
}

impl<T> Demand<T> {
    /// Hands over one item; `false` if the consumer stopped waiting.
    pub fn deliver(self, item: T) -> bool {
        self.reply.send(Ok(Some(item))).is_ok()
    }

    pub fn complete(self) {
        let _ = self.reply.send(Ok(None));
    }

    pub fn fail(self, error: ChannelError) {
        let _ = self.reply.send(Err(error));
    }
}

impl<T> fmt::Debug for Demand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Demand")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn reads_only_what_was_demanded() {
        let (mut sender, mut inbound) = inbound::<usize>();
        let produced = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&produced);
        let producer = tokio::spawn(async move {
            // an endless source: every demand pulls one more item
            while let Some(demand) = sender.demand().await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if !demand.deliver(n) {
                    break;
                }
            }
        });

        for expected in 1..=3 {
            assert_eq!(inbound.next().await.unwrap().unwrap(), expected);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(produced.load(Ordering::SeqCst), 3);

        drop(inbound);
        tokio::time::timeout(Duration::from_secs(1), producer).await.unwrap().unwrap();
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn error_is_delivered_once() {
        let (mut sender, mut inbound) = inbound::<Bytes>();

        tokio::spawn(async move {
            let demand = sender.demand().await.unwrap();
            demand.fail(ChannelError::Io { source: std::io::ErrorKind::ConnectionReset.into() });
        });

        assert!(matches!(inbound.next().await, Some(Err(ChannelError::Io { .. }))));
        assert!(inbound.next().await.is_none());
        assert!(inbound.is_terminated());
    }

    #[tokio::test]
    async fn dropped_producer_terminates_with_closed() {
        let (sender, mut inbound) = inbound::<Bytes>();
        drop(sender);

        assert!(matches!(inbound.next().await, Some(Err(ChannelError::Closed))));
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn aggregate_collects_chunks() {
        let (mut sender, inbound) = inbound::<Bytes>();

        tokio::spawn(async move {
            for chunk in ["hello", " ", "world"] {
                sender.demand().await.unwrap().deliver(Bytes::from(chunk));
            }
            sender.demand().await.unwrap().complete();
        });

        assert_eq!(inbound.aggregate().await.unwrap(), Bytes::from("hello world"));
    }
}
