use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use ripple_http::bootstrap::TcpOptions;
use ripple_http::channel::{Connection, ConnectionHooks, Inbound, Wiretap};
use ripple_http::codec::CodecConfig;
use ripple_http::connection::ServerConnection;
use ripple_http::handler::Handler;
use ripple_http::pipeline::{Assembly, Compression, CompressionPolicy};
use ripple_http::protocol::ConfigError;
use ripple_http::resources::EventLoopGroup;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::select;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;

/// A bound server.
///
/// Dropping the handle does not stop the server; call
/// [`dispose`](Self::dispose) or [`dispose_now`](Self::dispose_now).
#[derive(Debug, Clone)]
pub struct DisposableServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    force: CancellationToken,
    tracker: TaskTracker,
}

impl DisposableServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting. Open connections finish the exchange in flight,
    /// flush what they already accepted and close.
    pub fn dispose(&self) {
        if !self.shutdown.is_cancelled() {
            info!(local_addr = %self.local_addr, "disposing server");
        }
        self.shutdown.cancel();
        self.tracker.close();
    }

    /// Stops accepting and drops every open connection without flushing.
    pub fn dispose_now(&self) {
        self.force.cancel();
        self.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the server was disposed and every connection is closed.
    pub fn on_dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        let tracker = self.tracker.clone();
        async move { tracker.wait().await }
    }
}

/// What every accepted connection is set up with.
struct Acceptor<H> {
    handler: Arc<H>,
    codec: CodecConfig,
    compression: Option<CompressionPolicy>,
    hooks: ConnectionHooks,
    wiretap: bool,
    tcp: TcpOptions,
    workers: EventLoopGroup,
    shutdown: CancellationToken,
    force: CancellationToken,
    tracker: TaskTracker,
}

pub(crate) async fn bind<H>(assembly: Assembly<Arc<H>>) -> Result<DisposableServer, ServerError>
where
    H: Handler<Inbound<Bytes>> + 'static,
    H::Error: Send,
{
    let address = assembly.resolve_address()?;
    let selector = assembly.selector().cloned().ok_or_else(|| ConfigError::invalid_group("selector", "no selector group assembled"))?;
    let handler = assembly
        .pipeline()
        .handler()
        .map(Arc::clone)
        .ok_or_else(|| ConfigError::transform("no protocol handler installed"))?;
    let compression = match assembly.pipeline().compression() {
        Some(Compression::Encode(policy)) => Some(policy.clone()),
        _ => None,
    };

    let acceptor = Arc::new(Acceptor {
        handler,
        codec: assembly.codec_config(),
        compression,
        hooks: assembly.hooks().clone(),
        wiretap: assembly.pipeline().wiretap(),
        tcp: assembly.tcp_options(),
        workers: assembly.workers().clone(),
        shutdown: CancellationToken::new(),
        force: CancellationToken::new(),
        tracker: TaskTracker::new(),
    });

    let (bound_tx, bound_rx) = oneshot::channel();
    let accept_loop = selector.next();
    accept_loop.spawn(acceptor.tracker.track_future(accept(address, Arc::clone(&acceptor), bound_tx)));

    let local_addr = match bound_rx.await {
        Ok(Ok(local_addr)) => local_addr,
        Ok(Err(e)) => return Err(ServerError::Bind { source: e }),
        Err(_stopped) => return Err(ServerError::Bind { source: io::Error::other("accept loop stopped before binding") }),
    };
    info!(%local_addr, workers = acceptor.workers.len(), "server bound");

    Ok(DisposableServer {
        local_addr,
        shutdown: acceptor.shutdown.clone(),
        force: acceptor.force.clone(),
        tracker: acceptor.tracker.clone(),
    })
}

fn listen(address: SocketAddr, tcp: TcpOptions) -> io::Result<TcpListener> {
    let socket = if address.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(tcp.reuse_address)?;
    socket.bind(address)?;
    socket.listen(tcp.backlog)
}

async fn accept<H>(address: SocketAddr, acceptor: Arc<Acceptor<H>>, bound: oneshot::Sender<io::Result<SocketAddr>>)
where
    H: Handler<Inbound<Bytes>> + 'static,
    H::Error: Send,
{
    let listener = match listen(address, acceptor.tcp) {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, %address, "bind server error");
            let _ = bound.send(Err(e));
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(local_addr) => local_addr,
        Err(e) => {
            let _ = bound.send(Err(e));
            return;
        }
    };
    if bound.send(Ok(local_addr)).is_err() {
        debug!(%local_addr, "bind caller went away");
        return;
    }

    loop {
        let accepted = select! {
            biased;
            () = acceptor.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => acceptor.dispatch(stream, remote),
            Err(e) => warn!(cause = %e, "failed to accept"),
        }
    }
    debug!(%local_addr, "accept loop stopped");
}

impl<H> Acceptor<H>
where
    H: Handler<Inbound<Bytes>> + 'static,
    H::Error: Send,
{
    /// Moves an accepted socket to the next worker loop.
    fn dispatch(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.tcp.nodelay) {
            debug!(cause = %e, %remote, "failed to set nodelay");
        }
        // a tokio stream is bound to the loop that registered it
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(cause = %e, %remote, "failed to hand over accepted connection");
                return;
            }
        };

        let acceptor = Arc::clone(self);
        self.workers.next().spawn(self.tracker.track_future(async move { acceptor.serve(stream, remote).await }));
    }

    async fn serve(&self, stream: std::net::TcpStream, remote: SocketAddr) {
        let stream = match TcpStream::from_std(stream) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(cause = %e, %remote, "failed to register accepted connection");
                return;
            }
        };

        let connection = Connection::child_of(stream.local_addr().ok(), Some(remote), &self.shutdown);
        let id = connection.id();
        let io = Wiretap::new(stream, id, self.wiretap);
        let server_connection = ServerConnection::new(io, connection, self.codec, self.hooks.clone()).with_compression(self.compression.clone());

        select! {
            result = server_connection.process(Arc::clone(&self.handler)) => match result {
                Ok(()) => debug!(connection_id = id, "finished process, connection shutdown"),
                Err(e) => warn!(connection_id = id, cause = %e, "service has error, connection shutdown"),
            },
            // dropping the exchange drops the socket without flushing
            () = self.force.cancelled() => debug!(connection_id = id, "connection dropped by forced shutdown"),
        }
    }
}
