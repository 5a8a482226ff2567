//! The HTTP server configuration value.
//!
//! An [`HttpServer`] is immutable: every configuration method returns a new
//! value sharing the configuration chain of the old one, so a base
//! configuration can be refined in several directions without interference.
//! Nothing is validated until [`bind`](HttpServer::bind), where the chain is
//! materialized and the pipeline assembled.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use ripple_http::bootstrap::{Bootstrap, TcpOptions, TlsMode};
use ripple_http::channel::{Connection, ConnectionHooks, Inbound};
use ripple_http::config::ConfigChain;
use ripple_http::handler::Handler;
use ripple_http::pipeline::{CompressionPredicate, PipelineAssembler, keys};
use ripple_http::protocol::{BoxError, RequestHead, ResponseHead};

use crate::date::DateHandler;
use crate::error::ServerError;
use crate::resources::HttpResources;

mod bind;

pub use bind::DisposableServer;

pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Port `0` binds an ephemeral port; [`DisposableServer::local_addr`] tells which.
pub const DEFAULT_PORT: u16 = 0;

pub struct HttpServer<H = ()> {
    chain: ConfigChain,
    host: Arc<str>,
    port: u16,
    handler: Option<Arc<H>>,
    resources: Option<Arc<HttpResources>>,
}

impl HttpServer<()> {
    pub fn create() -> Self {
        Self { chain: ConfigChain::new(), host: Arc::from(DEFAULT_HOST), port: DEFAULT_PORT, handler: None, resources: None }
    }
}

impl<H> HttpServer<H> {
    fn with_chain(&self, chain: ConfigChain) -> Self {
        Self {
            chain,
            host: Arc::clone(&self.host),
            port: self.port,
            handler: self.handler.clone(),
            resources: self.resources.clone(),
        }
    }

    #[must_use]
    pub fn host(&self, host: &str) -> Self {
        let mut server = self.with_chain(self.chain.clone());
        server.host = Arc::from(host);
        server
    }

    #[must_use]
    pub fn port(&self, port: u16) -> Self {
        let mut server = self.with_chain(self.chain.clone());
        server.port = port;
        server
    }

    /// Replaces host and port by a supplier evaluated at every bind.
    #[must_use]
    pub fn bind_address<F>(&self, supplier: F) -> Self
    where
        F: Fn() -> io::Result<SocketAddr> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        self.with_chain(self.chain.map(move |b| {
            let supplier = Arc::clone(&supplier);
            b.address(move || supplier())
        }))
    }

    /// `true` compresses every response the client accepts an encoding for;
    /// `false` removes any threshold or predicate configured before.
    #[must_use]
    pub fn compress(&self, enabled: bool) -> Self {
        if enabled {
            return self.compress_min_size(0);
        }
        self.with_chain(self.chain.map(|mut b| {
            b.attrs_mut().take(keys::COMPRESSION_MIN_SIZE);
            b.attrs_mut().take(keys::COMPRESSION_PREDICATE);
            b
        }))
    }

    /// Compresses responses of at least `min_size` bytes.
    #[must_use]
    pub fn compress_min_size(&self, min_size: usize) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::COMPRESSION_MIN_SIZE, min_size)))
    }

    /// Compresses responses the predicate accepts, whatever their size.
    #[must_use]
    pub fn compress_when<P>(&self, predicate: P) -> Self
    where
        P: Fn(&RequestHead, &ResponseHead) -> bool + Send + Sync + 'static,
    {
        let predicate: CompressionPredicate = Arc::new(predicate);
        self.with_chain(self.chain.map(move |b| b.attr(keys::COMPRESSION_PREDICATE, Arc::clone(&predicate))))
    }

    #[must_use]
    pub fn max_initial_line_length(&self, max: usize) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::MAX_INITIAL_LINE_LENGTH, max)))
    }

    #[must_use]
    pub fn max_header_size(&self, max: usize) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::MAX_HEADER_SIZE, max)))
    }

    #[must_use]
    pub fn max_chunk_size(&self, max: usize) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::MAX_CHUNK_SIZE, max)))
    }

    #[must_use]
    pub fn validate_headers(&self, validate: bool) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::VALIDATE_HEADERS, validate)))
    }

    #[must_use]
    pub fn initial_buffer_size(&self, size: usize) -> Self {
        self.with_chain(self.chain.map(move |b| b.attr(keys::INITIAL_BUFFER_SIZE, size)))
    }

    /// Logs every read and write of every connection.
    #[must_use]
    pub fn wiretap(&self, enabled: bool) -> Self {
        self.with_chain(self.chain.map(move |b| b.wiretap(enabled)))
    }

    #[must_use]
    pub fn tls(&self, mode: TlsMode) -> Self {
        self.with_chain(self.chain.map(move |b| b.tls(mode)))
    }

    #[must_use]
    pub fn do_on_connection<F>(&self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let hooks = ConnectionHooks::new().with_before(move |_: &(), connection| hook(connection));
        self.with_chain(self.chain.map(move |b| b.connection_hooks(&hooks)))
    }

    #[must_use]
    pub fn do_on_disconnection<F>(&self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let hooks = ConnectionHooks::new().with_after(move |_: &(), connection| hook(connection));
        self.with_chain(self.chain.map(move |b| b.connection_hooks(&hooks)))
    }

    #[must_use]
    pub fn tcp_configuration<F>(&self, configure: F) -> Self
    where
        F: Fn(TcpOptions) -> TcpOptions + Send + Sync + 'static,
    {
        self.with_chain(self.chain.map(move |b| b.tcp(&configure)))
    }

    /// Runs this server on `resources` instead of the shared [`HttpResources`].
    #[must_use]
    pub fn resources(&self, resources: Arc<HttpResources>) -> Self {
        let mut server = self.with_chain(self.chain.clone());
        server.resources = Some(resources);
        server
    }

    /// Sets the handler every request is dispatched to.
    pub fn handle<N>(&self, handler: N) -> HttpServer<N>
    where
        N: Handler<Inbound<Bytes>> + 'static,
    {
        HttpServer {
            chain: self.chain.clone(),
            host: Arc::clone(&self.host),
            port: self.port,
            handler: Some(Arc::new(handler)),
            resources: self.resources.clone(),
        }
    }
}

impl<H> HttpServer<H>
where
    H: Handler<Inbound<Bytes>> + 'static,
    H::Error: Send,
{
    /// Materializes the configuration, assembles the pipeline and starts
    /// accepting connections.
    ///
    /// Configuration errors surface here, before any socket is bound.
    pub async fn bind(&self) -> Result<DisposableServer, ServerError> {
        let handler = self.handler.clone().ok_or(ServerError::MissingHandler)?;

        let mut bootstrap = self.chain.materialize(Bootstrap::server())?;
        if !bootstrap.has_address() {
            let address = resolve(&self.host, self.port).await.map_err(|e| ServerError::Bind { source: e })?;
            bootstrap = bootstrap.address(move || Ok(address));
        }

        let resources = self.resources.clone().unwrap_or_else(HttpResources::get);
        let assembly = PipelineAssembler::server().assemble(&mut bootstrap, resources.loops(), Arc::new(DateHandler::new(handler)))?;
        bind::bind(assembly).await
    }
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{host} resolved to no address")))
}

impl<H> Clone for HttpServer<H> {
    fn clone(&self) -> Self {
        self.with_chain(self.chain.clone())
    }
}

impl<H> fmt::Debug for HttpServer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("transforms", &self.chain.len())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseBody;
    use http::{Request, Response};
    use ripple_http::handler::make_handler;
    use ripple_http::protocol::ConfigError;
    use std::convert::Infallible;

    fn hello() -> impl Handler<Inbound<Bytes>, Error: Send> {
        make_handler(|_req: Request<Inbound<Bytes>>| async { Ok::<_, Infallible>(Response::new(ResponseBody::from("hello"))) })
    }

    #[test]
    fn configuration_methods_leave_the_original_untouched() {
        let base = HttpServer::create().port(8080);
        let compressed = base.compress(true);
        let wiretapped = base.wiretap(true);

        assert_eq!(base.chain.len(), 0);
        assert_eq!(compressed.chain.len(), 1);
        assert_eq!(wiretapped.chain.len(), 1);
        assert_eq!(compressed.port, 8080);
    }

    #[test]
    fn compress_false_clears_threshold_and_predicate() {
        let server = HttpServer::create().compress_min_size(10).compress_when(|_, _| true).compress(false);

        let bootstrap = server.chain.materialize(Bootstrap::server()).unwrap();
        assert!(!bootstrap.attrs().contains(keys::COMPRESSION_MIN_SIZE));
        assert!(!bootstrap.attrs().contains(keys::COMPRESSION_PREDICATE));
    }

    #[test]
    fn later_settings_win() {
        let server = HttpServer::create().max_header_size(1024).max_header_size(2048);

        let bootstrap = server.chain.materialize(Bootstrap::server()).unwrap();
        assert_eq!(bootstrap.attrs().get(keys::MAX_HEADER_SIZE), Some(&2048));
    }

    #[tokio::test]
    async fn invalid_threshold_fails_before_binding() {
        let result = HttpServer::create().max_header_size(0).handle(hello()).bind().await;
        assert!(matches!(result, Err(ServerError::Config { source: ConfigError::InvalidThreshold { .. } })));
    }

    #[tokio::test]
    async fn disposed_resources_fail_bind() {
        let resources = Arc::new(HttpResources::new(
            ripple_http::resources::LoopResources::new("disposed", 1, 1, false),
            ripple_http::resources::PoolConfig::default(),
        ));
        resources.dispose();

        let result = HttpServer::create().resources(resources).handle(hello()).bind().await;
        assert!(matches!(result, Err(ServerError::Config { source: ConfigError::InvalidEventLoopGroup { .. } })));
    }

    #[tokio::test]
    async fn resolve_host_and_port() {
        assert_eq!(resolve("127.0.0.1", 9000).await.unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(resolve("::1", 9000).await.unwrap(), "[::1]:9000".parse().unwrap());
    }

    #[tokio::test]
    async fn host_is_resolved_before_binding() {
        let server = HttpServer::create().host("127.0.0.1").port(0).handle(hello()).bind().await.unwrap();
        assert!(server.local_addr().ip().is_loopback());
        server.dispose_now();
    }
}
