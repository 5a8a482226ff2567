use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

use super::Connection;
use super::operations::Closer;
use crate::protocol::ChannelError;

/// Transports that can be handed over after a protocol switch.
pub trait UpgradeIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> UpgradeIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A connection taken over by another protocol after `101 Switching Protocols`.
///
/// Bytes the codec had already buffered are replayed before reading from the
/// socket again. Dropping it closes the connection.
pub struct Upgraded {
    io: Box<dyn UpgradeIo>,
    read_buf: BytesMut,
    closer: Closer,
}

impl Upgraded {
    pub(crate) fn new(io: Box<dyn UpgradeIo>, read_buf: BytesMut, closer: Closer) -> Self {
        Self { io, read_buf, closer }
    }

    pub fn connection(&self) -> &Connection {
        self.closer.connection()
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if !self.read_buf.is_empty() {
            let n = self.read_buf.len().min(buf.remaining());
            let replay = self.read_buf.split_to(n);
            buf.put_slice(&replay);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// Found in the extensions of a request asking to switch protocols.
///
/// Once the handler answered `101 Switching Protocols` and the head was
/// written, [`upgraded`](Self::upgraded) resolves to the raw connection.
#[derive(Clone)]
pub struct OnUpgrade {
    slot: Arc<Mutex<Option<oneshot::Receiver<Upgraded>>>>,
}

impl OnUpgrade {
    pub(crate) fn pair() -> (oneshot::Sender<Upgraded>, OnUpgrade) {
        let (tx, rx) = oneshot::channel();
        (tx, OnUpgrade { slot: Arc::new(Mutex::new(Some(rx))) })
    }

    /// Only the first caller gets the connection; later ones see `Closed`.
    pub async fn upgraded(self) -> Result<Upgraded, ChannelError> {
        let receiver = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match receiver {
            Some(receiver) => receiver.await.map_err(|_dropped| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }
}

impl fmt::Debug for OnUpgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnUpgrade")
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("connection", self.connection()).field("buffered", &self.read_buf.len()).finish()
    }
}
