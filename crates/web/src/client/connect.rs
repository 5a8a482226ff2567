use std::fmt;
use std::io;
use std::net::SocketAddr;

use ripple_http::bootstrap::TcpOptions;
use ripple_http::channel::{Connection, ConnectionHooks, Wiretap};
use ripple_http::codec::CodecConfig;
use ripple_http::connection::ClientConnection;
use ripple_http::resources::{EventLoop, Pooled, Reusable};
use tokio::net::TcpStream;
use tracing::debug;

pub(crate) type Transport = Wiretap<TcpStream>;

/// A client connection together with the loop its socket is registered on.
///
/// Every exchange on the connection runs as a task on that loop.
pub struct PooledConnection {
    pub(crate) conn: ClientConnection<Transport>,
    pub(crate) event_loop: EventLoop,
}

impl Reusable for PooledConnection {
    fn is_reusable(&self) -> bool {
        self.conn.is_reusable()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", self.conn.connection())
            .field("exchanges", &self.conn.exchanges())
            .field("event_loop", &self.event_loop)
            .finish()
    }
}

/// Everything needed to open one more connection for a client configuration.
#[derive(Clone)]
pub(crate) struct Connector {
    pub(crate) tcp: TcpOptions,
    pub(crate) wiretap: bool,
    pub(crate) codec: CodecConfig,
    pub(crate) hooks: ConnectionHooks,
}

impl Connector {
    /// Connects from `event_loop`, so the socket is registered on it.
    pub(crate) async fn connect(self, event_loop: EventLoop, address: SocketAddr) -> io::Result<PooledConnection> {
        let nodelay = self.tcp.nodelay;
        let stream = event_loop
            .spawn(async move {
                let stream = TcpStream::connect(address).await?;
                stream.set_nodelay(nodelay)?;
                Ok::<_, io::Error>(stream)
            })
            .await
            .map_err(io::Error::other)??;

        let connection = Connection::new(stream.local_addr().ok(), Some(address));
        debug!(connection_id = connection.id(), %address, event_loop = event_loop.index(), "connected");
        let io = Wiretap::new(stream, connection.id(), self.wiretap);
        let mut conn = ClientConnection::new(io, connection, self.codec, self.hooks);
        conn.on_active().map_err(io::Error::other)?;

        Ok(PooledConnection { conn, event_loop })
    }
}

/// A connection checked out for one exchange: from the pool, or opened just
/// for it.
pub(crate) enum Lease {
    Pooled(Pooled<PooledConnection>),
    Owned(PooledConnection),
}

impl Lease {
    pub(crate) fn is_reused(&self) -> bool {
        match self {
            Lease::Pooled(pooled) => pooled.is_reused(),
            Lease::Owned(_) => false,
        }
    }

    pub(crate) fn get_mut(&mut self) -> &mut PooledConnection {
        match self {
            Lease::Pooled(pooled) => pooled,
            Lease::Owned(owned) => owned,
        }
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        match self {
            Lease::Pooled(pooled) => &pooled.event_loop,
            Lease::Owned(owned) => &owned.event_loop,
        }
    }

    /// Ends the exchange; only a pooled connection that is still reusable
    /// goes back to the idle set.
    pub(crate) async fn finish(self, reusable: bool) {
        match self {
            Lease::Pooled(pooled) if reusable => pooled.release(),
            Lease::Pooled(pooled) => pooled.discard(),
            Lease::Owned(mut owned) => owned.conn.close().await,
        }
    }

    pub(crate) fn into_inner(self) -> PooledConnection {
        match self {
            Lease::Pooled(pooled) => pooled.into_inner(),
            Lease::Owned(owned) => owned,
        }
    }
}
