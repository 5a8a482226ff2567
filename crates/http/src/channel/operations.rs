use std::marker::PhantomData;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace, warn};

use super::upgrade::{UpgradeIo, Upgraded};
use super::{Connection, ConnectionStatus};
use crate::hooks::LifecycleHooks;
use crate::protocol::ChannelError;

/// Hooks fired when a connection becomes active and when it closes.
pub type ConnectionHooks = LifecycleHooks<()>;

/// Owns the terminal transition of one connection.
///
/// Whoever calls [`Closer::close`] first (or drops the last owner) moves the
/// connection to `Closed` and runs the disconnect hooks; every later call is a
/// no-op.
pub(crate) struct Closer {
    connection: Connection,
    hooks: ConnectionHooks,
}

impl Closer {
    pub(crate) fn new(connection: Connection, hooks: ConnectionHooks) -> Self {
        Self { connection, hooks }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn close(&self) -> bool {
        if !self.connection.mark_closed() {
            return false;
        }
        debug!(connection_id = self.connection.id(), "connection closed");
        if let Err(e) = self.hooks.fire_after("on_disconnection", &(), &self.connection) {
            warn!(connection_id = self.connection.id(), cause = %e, "disconnect hook failed");
        }
        true
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bridges one framed transport session into the connection state machine.
///
/// Reads happen only when [`receive`](Self::receive) is awaited, which is how
/// consumer demand turns into transport read demand. Writes complete only once
/// the framed sink accepted and flushed them.
pub struct ChannelOperations<IO, C, Out> {
    framed: Framed<IO, C>,
    closer: Closer,
    _out: PhantomData<fn(Out)>,
}

impl<IO, C, Out> ChannelOperations<IO, C, Out>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    C: Decoder + Encoder<Out>,
    ChannelError: From<<C as Decoder>::Error> + From<<C as Encoder<Out>>::Error>,
{
    pub fn new(io: IO, codec: C, read_capacity: usize, connection: Connection, hooks: ConnectionHooks) -> Self {
        Self {
            framed: Framed::with_capacity(io, codec, read_capacity),
            closer: Closer::new(connection, hooks),
            _out: PhantomData,
        }
    }

    pub fn connection(&self) -> &Connection {
        self.closer.connection()
    }

    pub fn codec(&self) -> &C {
        self.framed.codec()
    }

    pub fn codec_mut(&mut self) -> &mut C {
        self.framed.codec_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.connection().status() == ConnectionStatus::Closed
    }

    /// `Idle -> Active`, then the connect hooks.
    pub fn on_active(&mut self) -> Result<(), ChannelError> {
        if !self.connection().state().activate() {
            return Err(ChannelError::Closed);
        }
        debug!(
            connection_id = self.connection().id(),
            remote = ?self.connection().remote_address(),
            "connection active"
        );

        if let Err(e) = self.closer.hooks.fire_before("on_connection", &(), self.closer.connection()) {
            self.closer.close();
            return Err(e.into());
        }
        Ok(())
    }

    /// `Draining -> Active` when a kept-alive connection starts its next exchange.
    pub fn reactivate(&mut self) {
        self.connection().state().reactivate();
    }

    /// Pulls the next decoded item from the transport.
    ///
    /// `None` means the connection is closed: either the peer went away or
    /// disposal was requested. A transport error is returned once and closes the
    /// connection. A protocol error is returned once as well, but closing is
    /// left to the caller; the next call returns `None`.
    pub async fn receive(&mut self) -> Option<Result<<C as Decoder>::Item, ChannelError>> {
        if self.is_closed() {
            return None;
        }

        let dispose = self.connection().dispose_token().clone();
        let next = select! {
            biased;
            () = dispose.cancelled() => None,
            item = self.framed.next() => Some(item),
        };

        match next {
            None => {
                trace!(connection_id = self.connection().id(), "disposal requested while reading");
                self.close().await;
                None
            }
            Some(None) => {
                debug!(connection_id = self.connection().id(), "peer closed connection");
                self.closer.close();
                None
            }
            Some(Some(Ok(item))) => Some(Ok(item)),
            Some(Some(Err(e))) => {
                let e = ChannelError::from(e);
                warn!(connection_id = self.connection().id(), cause = %e, "inbound failure");
                // a protocol error leaves the write side usable for a final error response
                if !matches!(e, ChannelError::Parse { .. }) {
                    self.closer.close();
                }
                Some(Err(e))
            }
        }
    }

    /// Writes `item` and flushes it to the transport.
    pub async fn send(&mut self, item: Out) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let result = self.framed.send(item).await;
        self.on_write_result(result)
    }

    /// Buffers `item` without flushing; the next [`send`](Self::send) or
    /// [`flush`](Self::flush) pushes it out.
    pub async fn feed(&mut self, item: Out) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let result = self.framed.feed(item).await;
        self.on_write_result(result)
    }

    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let result = SinkExt::<Out>::flush(&mut self.framed).await;
        self.on_write_result(result)
    }

    /// Writes bytes that bypass the codec, e.g. an interim `100 Continue`.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.flush().await?;
        let io = self.framed.get_mut();
        let result = match io.write_all(bytes).await {
            Ok(()) => io.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            self.closer.close();
            ChannelError::from(e)
        })
    }

    /// `Active -> Draining`: the current outbound message is complete.
    ///
    /// Buffered writes are flushed first; with `half_close` the write side of the
    /// transport is shut down as well.
    pub async fn complete_outbound(&mut self, half_close: bool) -> Result<(), ChannelError> {
        self.flush().await?;
        if self.connection().state().drain() {
            trace!(connection_id = self.connection().id(), "outbound complete");
        }
        self.connection().signal_outbound_complete();
        if half_close {
            self.framed.get_mut().shutdown().await.map_err(|e| {
                self.closer.close();
                ChannelError::from(e)
            })?;
        }
        Ok(())
    }

    /// Closes the connection; graceful unless `dispose_now` was requested.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if !self.connection().is_forced() {
            if let Err(e) = SinkExt::<Out>::flush(&mut self.framed).await {
                let e = ChannelError::from(e);
                debug!(connection_id = self.connection().id(), cause = %e, "flush before close failed");
            }
            if let Err(e) = self.framed.get_mut().shutdown().await {
                debug!(connection_id = self.connection().id(), cause = %e, "write shutdown before close failed");
            }
        }
        self.closer.close();
    }

    /// Performs the terminal transition without touching the transport.
    pub fn terminate(&mut self) -> bool {
        self.closer.close()
    }

    /// Hands the raw transport, plus anything already read past the last
    /// message, to a protocol that takes over the connection.
    pub fn into_upgraded(self) -> Upgraded
    where
        IO: UpgradeIo,
    {
        let parts = self.framed.into_parts();
        debug!(connection_id = self.closer.connection().id(), buffered = parts.read_buf.len(), "connection upgraded");
        Upgraded::new(Box::new(parts.io), parts.read_buf, self.closer)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_closed() || self.connection().is_forced() {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn on_write_result<E>(&mut self, result: Result<(), E>) -> Result<(), ChannelError>
    where
        ChannelError: From<E>,
    {
        result.map_err(|e| {
            let e = ChannelError::from(e);
            warn!(connection_id = self.connection().id(), cause = %e, "outbound failure");
            self.closer.close();
            e
        })
    }
}

impl<IO, C, Out> std::fmt::Debug for ChannelOperations<IO, C, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOperations").field("connection", self.closer.connection()).finish()
    }
}
