use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, TryStreamExt};
use http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::uri::{Authority, Parts};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use http_body::Frame;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use ripple_http::bootstrap::Bootstrap;
use ripple_http::channel::{Connection, Outbound};
use ripple_http::pipeline::{ACCEPTED_ENCODINGS, Compression, PipelineAssembler};
use ripple_http::protocol::{BoxError, ChannelError, RequestHead, ResponseHead};
use ripple_http::resources::EventLoopGroup;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use super::connect::{Connector, Lease};
use super::exchange::{Delivered, Outgoing, Writer, dispatch};
use super::redirect::{RedirectTracker, switches_to_get};
use super::response::ResponseContent;
use super::{DEFAULT_BASE_URL, HttpClient};
use crate::error::{ClientError, RedirectError};
use crate::resources::HttpResources;
use crate::websocket::{self, WebsocketSession};

enum UriSource {
    Literal(String),
    Deferred(BoxFuture<'static, String>),
}

/// What the request sends as its body.
///
/// Only empty and buffered bodies can be sent again for a redirect or after
/// a stale pooled connection.
enum Payload {
    Empty,
    Bytes(Bytes),
    Stream(Option<ripple_http::protocol::BoxBody>),
    Writer(Option<Writer>),
}

impl Payload {
    fn is_replayable(&self) -> bool {
        matches!(self, Payload::Empty | Payload::Bytes(_))
    }

    fn take(&mut self) -> Result<Outgoing, ClientError> {
        match self {
            Payload::Empty => Ok(Outgoing::Body(Empty::new().map_err(|never| match never {}).boxed_unsync())),
            Payload::Bytes(bytes) => Ok(Outgoing::Body(Full::new(bytes.clone()).map_err(|never| match never {}).boxed_unsync())),
            Payload::Stream(body) => body.take().map(Outgoing::Body).ok_or(ClientError::BodyConsumed),
            Payload::Writer(write) => write.take().map(Outgoing::Writer).ok_or(ClientError::BodyConsumed),
        }
    }
}

/// One request being prepared; nothing is sent until a `response*` method
/// is awaited.
pub struct RequestSender {
    client: HttpClient,
    method: Method,
    uri: UriSource,
    headers: HeaderMap,
    body: Payload,
}

impl RequestSender {
    pub(crate) fn new(client: HttpClient, method: Method) -> Self {
        Self { client, method, uri: UriSource::Literal(String::from("/")), headers: HeaderMap::new(), body: Payload::Empty }
    }

    /// Absolute, or relative to the client's base url.
    #[must_use]
    pub fn uri<U: Into<String>>(mut self, uri: U) -> Self {
        self.uri = UriSource::Literal(uri.into());
        self
    }

    /// Resolves the uri only when the request is sent.
    #[must_use]
    pub fn uri_future<F>(mut self, uri: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        self.uri = UriSource::Deferred(uri.boxed());
        self
    }

    /// Adds a header to this request only, after the client's defaults.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Streams the body; it is written as the stream produces chunks.
    #[must_use]
    pub fn send<S, E>(mut self, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let frames = body.map_ok(Frame::data).map_err(Into::<BoxError>::into);
        self.body = Payload::Stream(Some(StreamBody::new(frames).boxed_unsync()));
        self
    }

    /// Sends a buffered body with its `content-length`.
    #[must_use]
    pub fn send_bytes<B: Into<Bytes>>(mut self, body: B) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { Payload::Empty } else { Payload::Bytes(body) };
        self
    }

    /// Writes the body once the connection is acquired.
    ///
    /// `write` may still adjust the request head; the head is sent after it
    /// returned its future, and the body ends when the future completes.
    #[must_use]
    pub fn send_with<F, Fut>(mut self, write: F) -> Self
    where
        F: FnOnce(&mut RequestHead, Outbound) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ChannelError>> + Send + 'static,
    {
        let writer: Writer = Box::new(move |head: &mut RequestHead, outbound: Outbound| write(head, outbound).boxed());
        self.body = Payload::Writer(Some(writer));
        self
    }

    /// The response head; the body is drained in the background.
    pub async fn response(self) -> Result<ResponseHead, ClientError> {
        let (delivered, _decode) = self.execute(false).await?;
        Ok(delivered.into_head())
    }

    /// The response head and the whole body.
    pub async fn response_single(self) -> Result<(ResponseHead, Bytes), ClientError> {
        let (head, content) = self.response_content().await?;
        let body = content.aggregate().await?;
        Ok((head, body))
    }

    /// The response head and its body as a stream.
    pub async fn response_content(self) -> Result<(ResponseHead, ResponseContent), ClientError> {
        let (delivered, decode) = self.execute(false).await?;
        let (mut head, _connection, body) = delivered.consume();
        let content = ResponseContent::new(&mut head, body, decode)?;
        Ok((head, content))
    }

    /// Hands head, body and the connection to `f`; whatever `f` leaves of
    /// the body is discarded once the content is dropped.
    pub async fn response_connection<F, Fut, R>(self, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(ResponseHead, ResponseContent, Connection) -> Fut,
        Fut: Future<Output = R>,
    {
        let (delivered, decode) = self.execute(false).await?;
        let (mut head, connection, body) = delivered.consume();
        let content = ResponseContent::new(&mut head, body, decode)?;
        Ok(f(head, content, connection).await)
    }

    /// Opens a websocket asking for one of the comma separated `protocols`.
    ///
    /// Fails when the server picked a protocol outside that list, or none
    /// although some were requested.
    pub async fn websocket(self, protocols: &str) -> Result<WebsocketSession, ClientError> {
        let key = websocket::generate_key();
        let sender = websocket::client_headers(&key, protocols)
            .into_iter()
            .fold(self, |sender, (name, value)| sender.header(name, value));

        let (delivered, _decode) = sender.execute(true).await?;
        websocket::verify_response(&delivered.head, &key, protocols)?;
        let (head, upgraded) = delivered.upgrade().await.map_err(crate::error::WebsocketError::from)?;
        let protocol = websocket::selected_protocol(&head);
        let stream = WebSocketStream::from_raw_socket(upgraded, tokio_tungstenite::tungstenite::protocol::Role::Client, None).await;
        Ok(WebsocketSession::new(stream, protocol, head))
    }

    /// Sends the request, following redirects when enabled; also tells
    /// whether the body is to be decoded.
    async fn execute(self, upgrade: bool) -> Result<(Delivered, bool), ClientError> {
        let RequestSender { client, mut method, uri, headers: extra, mut body } = self;
        let uri = match uri {
            UriSource::Literal(uri) => uri,
            UriSource::Deferred(uri) => uri.await,
        };
        let mut target = resolve_uri(client.base_url.as_deref(), client.port, &uri)?;

        let mut bootstrap = client.chain.materialize(Bootstrap::client())?;
        let pinned = bootstrap.has_address();
        let resources = client.shared_resources();
        let assembly = PipelineAssembler::client().assemble(&mut bootstrap, resources.loops(), ())?;
        let options = assembly.options();
        let decode = matches!(assembly.pipeline().compression(), Some(Compression::Decode));
        let dialer = Dialer {
            connector: Connector {
                tcp: assembly.tcp_options(),
                wiretap: assembly.pipeline().wiretap(),
                codec: assembly.codec_config(),
                hooks: assembly.hooks().clone(),
            },
            workers: assembly.workers().clone(),
            resources,
            chunked: options.chunked_transfer,
        };

        let mut headers = default_headers(&client, &target, decode, extra)?;
        let mut redirects = RedirectTracker::new(target.clone());

        loop {
            let address = if pinned { assembly.resolve_address()? } else { lookup(&target).await? };
            let request = Hop { method: &method, target: &target, headers: &headers };
            let delivered = client.exchange(&dialer, address, &request, &mut body).await?;

            if !options.follow_redirect || upgrade {
                return Ok((delivered, decode));
            }
            let status = delivered.head.status();
            let Some(next) = redirects.follow(status, delivered.head.headers())? else {
                return Ok((delivered, decode));
            };

            if switches_to_get(status, &method) {
                method = Method::GET;
                body = Payload::Empty;
                for name in [CONTENT_TYPE, CONTENT_LENGTH, TRANSFER_ENCODING] {
                    headers.remove(name);
                }
            } else if !body.is_replayable() {
                debug!(%status, location = %next, "request body can't be replayed, giving up on the redirect");
                delivered.discard();
                return Err(RedirectError::BodyNotReplayable { status, location: next.to_string() }.into());
            }
            delivered.discard();

            if next.authority() != target.authority()
                && let Some(authority) = next.authority()
            {
                headers.insert(HOST, host_header(authority)?);
            }
            debug!(%status, location = %next, hops = redirects.hops(), "following redirect");
            target = next;
        }
    }
}

struct Hop<'a> {
    method: &'a Method,
    target: &'a Uri,
    headers: &'a HeaderMap,
}

impl Hop<'_> {
    fn build(&self, body: &mut Payload) -> Result<Request<Outgoing>, ClientError> {
        let mut request = Request::new(body.take()?);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.target.clone();
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

/// Where and how connections for one request are opened.
struct Dialer {
    connector: Connector,
    workers: EventLoopGroup,
    resources: Arc<HttpResources>,
    chunked: bool,
}

impl HttpClient {
    /// Sends one hop; a request that failed on a reused pooled connection
    /// before any response arrived is sent once more on a fresh one.
    async fn exchange(&self, dialer: &Dialer, address: SocketAddr, hop: &Hop<'_>, body: &mut Payload) -> Result<Delivered, ClientError> {
        let mut retried = false;
        loop {
            let lease = self.lease(dialer, address).await?;
            let reused = lease.is_reused();
            let request = hop.build(body)?;
            match dispatch(lease, request, dialer.chunked, self.hooks.clone()).await {
                Err(e) if reused && !retried && e.is_transport() && body.is_replayable() => {
                    debug!(%address, cause = %e, "pooled connection went stale, retrying");
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn lease(&self, dialer: &Dialer, address: SocketAddr) -> Result<Lease, ClientError> {
        let connect = {
            let connector = dialer.connector.clone();
            let event_loop = dialer.workers.next();
            move || connector.connect(event_loop, address)
        };
        if self.pooled {
            return Ok(Lease::Pooled(dialer.resources.pool().acquire(address, connect).await?));
        }
        connect().await.map(Lease::Owned).map_err(|e| ClientError::Connect { source: e })
    }
}

fn resolve_uri(base_url: Option<&str>, port: Option<u16>, uri: &str) -> Result<Uri, ClientError> {
    let absolute = if uri.contains("://") {
        uri.to_string()
    } else {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let separator = if uri.starts_with('/') { "" } else { "/" };
        format!("{base}{separator}{uri}")
    };

    let target: Uri = absolute.parse().map_err(|e| ClientError::invalid_uri(&absolute, e))?;
    let Some(authority) = target.authority() else {
        return Err(ClientError::invalid_uri(&absolute, "missing host"));
    };
    match port {
        Some(port) if authority.port().is_none() => {
            let mut parts: Parts = target.clone().into_parts();
            let authority: Authority = format!("{}:{port}", authority.host()).parse().map_err(|e| ClientError::invalid_uri(&absolute, e))?;
            parts.authority = Some(authority);
            Uri::from_parts(parts).map_err(|e| ClientError::invalid_uri(&absolute, e))
        }
        _ => Ok(target),
    }
}

fn host_header(authority: &Authority) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(authority.as_str()).map_err(|e| ClientError::invalid_uri(authority, e))
}

fn default_headers(client: &HttpClient, target: &Uri, decode: bool, extra: HeaderMap) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(super::USER_AGENT));
    if decode {
        headers.insert(ACCEPT_ENCODING, ACCEPTED_ENCODINGS);
    }
    for transform in client.headers.iter() {
        transform(&mut headers);
    }
    let mut last = None;
    for (name, value) in extra {
        // the iterator yields a name only for the first of several values
        if let Some(name) = name {
            headers.remove(&name);
            last = Some(name);
        }
        if let Some(name) = &last {
            headers.append(name.clone(), value);
        }
    }
    if !headers.contains_key(HOST)
        && let Some(authority) = target.authority()
    {
        headers.insert(HOST, host_header(authority)?);
    }
    trace!(headers = headers.len(), "request headers prepared");
    Ok(headers)
}

async fn lookup(target: &Uri) -> Result<SocketAddr, ClientError> {
    let host = target.host().ok_or_else(|| ClientError::invalid_uri(target, "missing host"))?;
    let port = target.port_u16().unwrap_or(if target.scheme_str() == Some("https") { 443 } else { 80 });
    let mut addresses = tokio::net::lookup_host((host.trim_start_matches('[').trim_end_matches(']'), port))
        .await
        .map_err(|e| ClientError::Connect { source: e })?;
    addresses.next().ok_or_else(|| ClientError::invalid_uri(target, "host resolved to no address"))
}

impl fmt::Debug for RequestSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = match &self.uri {
            UriSource::Literal(uri) => uri.as_str(),
            UriSource::Deferred(_) => "<deferred>",
        };
        f.debug_struct("RequestSender").field("method", &self.method).field("uri", &uri).field("headers", &self.headers).finish_non_exhaustive()
    }
}
