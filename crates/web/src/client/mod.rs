//! The HTTP client configuration value.
//!
//! Like [`HttpServer`](crate::HttpServer), an [`HttpClient`] never changes:
//! configuration methods return a refined copy and the chain is only
//! materialized when a request is sent. A client created with
//! [`create`](HttpClient::create) leases connections from the pool of its
//! [`HttpResources`]; [`new_connection`](HttpClient::new_connection) opens a
//! fresh connection for every request and closes it afterwards.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, Method};
use ripple_http::bootstrap::{TcpOptions, TlsMode};
use ripple_http::channel::{Connection, ConnectionHooks};
use ripple_http::config::{Chain, ConfigChain};
use ripple_http::pipeline::keys;
use ripple_http::protocol::{BoxError, RequestHead, ResponseHead};

use crate::resources::HttpResources;

mod connect;
mod exchange;
mod redirect;
mod request;
mod response;

pub use connect::PooledConnection;
pub use redirect::MAX_REDIRECTS;
pub use request::RequestSender;
pub use response::ResponseContent;

use exchange::ExchangeHooks;

/// Base of relative request uris when no [`base_url`](HttpClient::base_url) is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost";
pub const USER_AGENT: &str = concat!("ripple/", env!("CARGO_PKG_VERSION"));

type HeaderTransform = Arc<dyn Fn(&mut HeaderMap) + Send + Sync>;

#[derive(Clone)]
pub struct HttpClient {
    chain: ConfigChain,
    pooled: bool,
    base_url: Option<Arc<str>>,
    port: Option<u16>,
    headers: Chain<HeaderTransform>,
    hooks: ExchangeHooks,
    resources: Option<Arc<HttpResources>>,
}

impl HttpClient {
    /// A client leasing connections from the shared pool.
    pub fn create() -> Self {
        Self {
            chain: ConfigChain::new(),
            pooled: true,
            base_url: None,
            port: None,
            headers: Chain::new(),
            hooks: ExchangeHooks::default(),
            resources: None,
        }
    }

    /// A client opening a dedicated connection per request.
    pub fn new_connection() -> Self {
        Self { pooled: false, ..Self::create() }
    }

    fn with_chain(&self, chain: ConfigChain) -> Self {
        Self { chain, ..self.clone() }
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Prefix for request uris that are not absolute.
    #[must_use]
    pub fn base_url(&self, base_url: &str) -> Self {
        Self { base_url: Some(Arc::from(base_url)), ..self.clone() }
    }

    /// Port used for targets that don't name one.
    #[must_use]
    pub fn port(&self, port: u16) -> Self {
        Self { port: Some(port), ..self.clone() }
    }

    /// Connects to the supplied address instead of resolving the request host.
    #[must_use]
    pub fn address_supplier<F>(&self, supplier: F) -> Self
    where
        F: Fn() -> io::Result<SocketAddr> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        self.with_chain(self.chain.map(move |b| {
            let supplier = Arc::clone(&supplier);
            b.address(move || supplier())
        }))
    }

    /// Asks for compressed responses and decodes them transparently.
    #[must_use]
    pub fn compress(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::ACCEPT_COMPRESSION, true)))
    }

    #[must_use]
    pub fn no_compression(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::ACCEPT_COMPRESSION, false)))
    }

    /// Follows up to [`MAX_REDIRECTS`] redirects per request.
    #[must_use]
    pub fn follow_redirect(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::FOLLOW_REDIRECT, true)))
    }

    #[must_use]
    pub fn no_redirection(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::FOLLOW_REDIRECT, false)))
    }

    /// Streams bodies of unknown length with `transfer-encoding: chunked`.
    #[must_use]
    pub fn chunked_transfer(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::CHUNKED_TRANSFER, true)))
    }

    /// Buffers bodies of unknown length to send a `content-length`.
    #[must_use]
    pub fn no_chunked_transfer(&self) -> Self {
        self.with_chain(self.chain.map(|b| b.attr(keys::CHUNKED_TRANSFER, false)))
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

    /// Adjusts the default headers of every request; transforms run in the
    /// order they were added.
    #[must_use]
    pub fn headers<F>(&self, transform: F) -> Self
    where
        F: Fn(&mut HeaderMap) + Send + Sync + 'static,
    {
        let transform: HeaderTransform = Arc::new(transform);
        Self { headers: self.headers.push(transform), ..self.clone() }
    }

    #[must_use]
    pub fn wiretap(&self, enabled: bool) -> Self {
        self.with_chain(self.chain.map(move |b| b.wiretap(enabled)))
    }

    #[must_use]
    pub fn tls(&self, mode: TlsMode) -> Self {
        self.with_chain(self.chain.map(move |b| b.tls(mode)))
    }

    #[must_use]
    pub fn tcp_configuration<F>(&self, configure: F) -> Self
    where
        F: Fn(TcpOptions) -> TcpOptions + Send + Sync + 'static,
    {
        self.with_chain(self.chain.map(move |b| b.tcp(&configure)))
    }

    #[must_use]
    pub fn do_on_connected<F>(&self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let hooks = ConnectionHooks::new().with_before(move |_: &(), connection| hook(connection));
        self.with_chain(self.chain.map(move |b| b.connection_hooks(&hooks)))
    }

    #[must_use]
    pub fn do_on_disconnected<F>(&self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let hooks = ConnectionHooks::new().with_after(move |_: &(), connection| hook(connection));
        self.with_chain(self.chain.map(move |b| b.connection_hooks(&hooks)))
    }

    /// Runs before the request head is written; an error aborts the request.
    #[must_use]
    pub fn do_on_request<F>(&self, hook: F) -> Self
    where
        F: Fn(&RequestHead, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.clone();
        hooks.request = hooks.request.with_before(hook);
        Self { hooks, ..self.clone() }
    }

    /// Runs once the request, body included, has been sent.
    #[must_use]
    pub fn do_after_request<F>(&self, hook: F) -> Self
    where
        F: Fn(&RequestHead, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.clone();
        hooks.request = hooks.request.with_after(hook);
        Self { hooks, ..self.clone() }
    }

    /// Runs when the response head arrived, before anyone sees it.
    #[must_use]
    pub fn do_on_response<F>(&self, hook: F) -> Self
    where
        F: Fn(&ResponseHead, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.clone();
        hooks.response = hooks.response.with_before(hook);
        Self { hooks, ..self.clone() }
    }

    /// Runs once the response body was consumed or discarded.
    #[must_use]
    pub fn do_after_response<F>(&self, hook: F) -> Self
    where
        F: Fn(&ResponseHead, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.clone();
        hooks.response = hooks.response.with_after(hook);
        Self { hooks, ..self.clone() }
    }

    /// Runs this client on `resources` instead of the shared [`HttpResources`].
    #[must_use]
    pub fn resources(&self, resources: Arc<HttpResources>) -> Self {
        Self { resources: Some(resources), ..self.clone() }
    }

    pub fn request(&self, method: Method) -> RequestSender {
        RequestSender::new(self.clone(), method)
    }

    pub fn get(&self) -> RequestSender {
        self.request(Method::GET)
    }

    pub fn head(&self) -> RequestSender {
        self.request(Method::HEAD)
    }

    pub fn options(&self) -> RequestSender {
        self.request(Method::OPTIONS)
    }

    pub fn delete(&self) -> RequestSender {
        self.request(Method::DELETE)
    }

    pub fn post(&self) -> RequestSender {
        self.request(Method::POST)
    }

    pub fn put(&self) -> RequestSender {
        self.request(Method::PUT)
    }

    pub fn patch(&self) -> RequestSender {
        self.request(Method::PATCH)
    }

    fn shared_resources(&self) -> Arc<HttpResources> {
        self.resources.clone().unwrap_or_else(HttpResources::get)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::create()
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("pooled", &self.pooled)
            .field("base_url", &self.base_url)
            .field("port", &self.port)
            .field("transforms", &self.chain.len())
            .field("header_transforms", &self.headers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_http::bootstrap::Bootstrap;

    #[test]
    fn configuration_methods_leave_the_original_untouched() {
        let base = HttpClient::create().base_url("http://example.com");
        let redirecting = base.follow_redirect();
        let compressing = base.compress().headers(|h| {
            h.insert("x-trace", http::HeaderValue::from_static("1"));
        });

        assert_eq!(base.chain.len(), 0);
        assert_eq!(redirecting.chain.len(), 1);
        assert_eq!(compressing.chain.len(), 1);
        assert_eq!(compressing.headers.len(), 1);
        assert_eq!(base.headers.len(), 0);
        assert_eq!(redirecting.base_url.as_deref(), Some("http://example.com"));
    }

    #[test]
    fn toggles_materialize_as_attributes() {
        let client = HttpClient::create().compress().follow_redirect().no_chunked_transfer().no_redirection();

        let bootstrap = client.chain.materialize(Bootstrap::client()).unwrap();
        assert_eq!(bootstrap.attrs().get(keys::ACCEPT_COMPRESSION), Some(&true));
        assert_eq!(bootstrap.attrs().get(keys::FOLLOW_REDIRECT), Some(&false));
        assert_eq!(bootstrap.attrs().get(keys::CHUNKED_TRANSFER), Some(&false));
    }

    #[test]
    fn new_connection_clients_are_not_pooled() {
        assert!(HttpClient::create().is_pooled());
        assert!(!HttpClient::new_connection().is_pooled());
        assert!(!HttpClient::new_connection().port(8080).is_pooled());
    }

    #[test]
    fn exchange_hooks_accumulate() {
        let client = HttpClient::create().do_on_request(|_, _| Ok(())).do_after_request(|_, _| Ok(())).do_on_response(|_, _| Ok(()));
        assert_eq!(client.hooks.request.len(), 2);
        assert_eq!(client.hooks.response.len(), 1);
        assert!(HttpClient::create().hooks.request.is_empty());
    }
}
