//! Caller side outbound handle.
//!
//! The channel between [`Outbound`] and [`OutboundReceiver`] holds a single
//! chunk. The connection driver only takes the next chunk after the previous
//! one was written to the socket, so a writer on a stalled connection waits in
//! `send` instead of growing a buffer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http_body::{Body, Frame};
use tokio::sync::mpsc;

use super::Connection;
use crate::protocol::ChannelError;

pub fn outbound(connection: Connection) -> (Outbound, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Outbound { tx, connection }, OutboundReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Bytes>,
    connection: Connection,
}

impl Outbound {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queues one chunk, waiting while the previous one is still being written.
    pub async fn send<B: Into<Bytes>>(&self, bytes: B) -> Result<(), ChannelError> {
        if self.connection.is_disposed() {
            return Err(ChannelError::Closed);
        }
        self.tx.send(bytes.into()).await.map_err(|_closed| ChannelError::Closed)
    }

    pub async fn send_string<S: Into<String>>(&self, text: S) -> Result<(), ChannelError> {
        self.send(Bytes::from(text.into())).await
    }

    /// Forwards every chunk of `stream` in order.
    pub async fn send_all<S, B>(&self, stream: S) -> Result<(), ChannelError>
    where
        S: Stream<Item = B>,
        B: Into<Bytes>,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(bytes) = stream.next().await {
            self.send(bytes).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for OutboundReceiver {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Body for OutboundReceiver {
    type Data = Bytes;
    type Error = ChannelError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx.poll_recv(cx).map(|item| item.map(|bytes| Ok(Frame::data(bytes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_send_waits_for_the_writer() {
        let (outbound, mut receiver) = outbound(Connection::new(None, None));

        outbound.send("first").await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), outbound.send("second")).await;
        assert!(blocked.is_err());

        assert_eq!(receiver.next().await, Some(Bytes::from("first")));
        outbound.send("third").await.unwrap();
        assert_eq!(receiver.next().await, Some(Bytes::from("third")));
    }

    #[tokio::test]
    async fn disposed_connection_rejects_writes() {
        let connection = Connection::new(None, None);
        let (outbound, _receiver) = outbound(connection.clone());
        connection.dispose();
        assert!(outbound.send("late").await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn dropped_receiver_closes_the_handle() {
        let (outbound, receiver) = outbound(Connection::new(None, None));
        drop(receiver);
        assert!(matches!(outbound.send_string("x").await, Err(ChannelError::Closed)));
    }
}
