use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderValue, Method, Request, Response, StatusCode, Version};
use http_body::{Body, SizeHint};
use http_body_util::{BodyExt, Empty};
use tracing::{debug, error, info, trace, warn};

use super::pump::{BodyPump, drive};
use crate::channel::{ChannelOperations, Connection, ConnectionHooks, Inbound, OnUpgrade, UpgradeIo, Upgraded, inbound};
use crate::codec::{CodecConfig, ServerCodec};
use crate::handler::Handler;
use crate::pipeline::CompressionPolicy;
use crate::protocol::{
    BoxBody, BoxError, ChannelError, HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHead, ResponseHead,
    SendError, expects_continue, is_keep_alive, is_upgrade, response_has_body,
};

type ResponseMessage = Message<(ResponseHead, PayloadSize), Bytes>;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const CLOSE: HeaderValue = HeaderValue::from_static("close");

/// Serves HTTP/1.1 exchanges on one accepted connection.
///
/// Requests are handled one after another. The request body reaches the
/// handler as an [`Inbound`] that only reads from the socket when polled; what
/// the handler leaves unread is drained before the next request.
pub struct ServerConnection<IO> {
    ops: ChannelOperations<IO, ServerCodec, ResponseMessage>,
    compression: Option<CompressionPolicy>,
}

enum Next {
    KeepAlive,
    Close,
    Upgrade(tokio::sync::oneshot::Sender<Upgraded>),
}

/// What the response side needs to know about the request it answers.
struct Exchange {
    method: Method,
    version: Version,
    keep_alive: bool,
}

impl<IO: UpgradeIo> ServerConnection<IO> {
    pub fn new(io: IO, connection: Connection, config: CodecConfig, hooks: ConnectionHooks) -> Self {
        let ops = ChannelOperations::new(io, ServerCodec::new(config), config.initial_buffer_size, connection, hooks);
        Self { ops, compression: None }
    }

    #[must_use]
    pub fn with_compression(mut self, policy: Option<CompressionPolicy>) -> Self {
        self.compression = policy;
        self
    }

    pub fn connection(&self) -> &Connection {
        self.ops.connection()
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler<Inbound<Bytes>>,
    {
        self.ops.on_active()?;

        loop {
            match self.ops.receive().await {
                Some(Ok(Message::Header((head, size)))) => match self.exchange(head, size, handler.as_ref()).await {
                    Ok(Next::KeepAlive) => self.ops.reactivate(),
                    Ok(Next::Close) => {
                        self.ops.close().await;
                        return Ok(());
                    }
                    Ok(Next::Upgrade(slot)) => {
                        let upgraded = self.ops.into_upgraded();
                        if slot.send(upgraded).is_err() {
                            debug!("upgraded connection was not claimed");
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        self.ops.close().await;
                        return Err(e);
                    }
                },

                Some(Ok(Message::Payload(_))) => {
                    error!("payload received while waiting for a request head");
                    self.reject(StatusCode::BAD_REQUEST).await;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(ChannelError::Parse { source })) => {
                    warn!(cause = %source, "can't receive next request");
                    self.reject(StatusCode::BAD_REQUEST).await;
                    return Err(source.into());
                }

                Some(Err(e)) => return Err(e.into()),

                None => {
                    info!(connection_id = self.ops.connection().id(), "can't read more requests, connection finished");
                    return Ok(());
                }
            }
        }
    }

    async fn exchange<H>(&mut self, head: RequestHead, size: PayloadSize, handler: &H) -> Result<Next, HttpError>
    where
        H: Handler<Inbound<Bytes>>,
    {
        let exchange = Exchange {
            method: head.method().clone(),
            version: head.version(),
            keep_alive: is_keep_alive(head.version(), head.headers()),
        };
        trace!(method = %exchange.method, uri = %head.uri(), "request received");

        if expects_continue(&head) && !size.is_empty() {
            self.ops.write_raw(CONTINUE).await?;
            debug!("receive expect request header, sent continue response");
        }

        let compression_head = self.compression.as_ref().map(|_| copy_head(&head));

        let (sender, body) = inbound::<Bytes>();
        let mut pump = BodyPump::new(sender);
        let mut request = head.map(|()| body.with_size_hint(size_hint(size)));
        request.extensions_mut().insert(self.ops.connection().clone());
        let upgrade = if is_upgrade(request.headers()) {
            let (slot, on_upgrade) = OnUpgrade::pair();
            request.extensions_mut().insert(on_upgrade);
            Some(slot)
        } else {
            None
        };

        let response = match drive(handler.call(request), &mut pump, &mut self.ops).await? {
            Ok(response) => response.map(boxed),
            Err(e) => {
                let e: BoxError = e.into();
                error!(cause = %e, "handler failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(slot) = upgrade {
                let (head, _body) = response.into_parts();
                self.ops.send(Message::Header((Response::from_parts(head, ()), PayloadSize::Empty))).await?;
                return Ok(Next::Upgrade(slot));
            }
        }

        let response = match (&self.compression, &compression_head) {
            (Some(policy), Some(request)) => drive(policy.prepare_response(request, response), &mut pump, &mut self.ops).await?,
            _ => response,
        };

        let keep_alive = self.respond(&exchange, response, &mut pump).await?;
        if !keep_alive || self.ops.connection().is_disposed() {
            return Ok(Next::Close);
        }

        pump.drain(&mut self.ops).await?;
        Ok(Next::KeepAlive)
    }

    /// Writes the response; returns whether the connection can be kept alive.
    async fn respond(&mut self, exchange: &Exchange, response: Response<BoxBody>, pump: &mut BodyPump) -> Result<bool, HttpError> {
        let (mut parts, mut body) = response.into_parts();
        let mut keep_alive = exchange.keep_alive && is_keep_alive(Version::HTTP_11, &parts.headers);

        let size = if response_has_body(&exchange.method, parts.status) {
            match PayloadSize::from_size_hint(&body.size_hint()) {
                PayloadSize::Chunked if exchange.version == Version::HTTP_10 => {
                    keep_alive = false;
                    PayloadSize::UntilClose
                }
                size => size,
            }
        } else {
            if exchange.method == Method::HEAD && !parts.headers.contains_key(CONTENT_LENGTH) {
                if let Some(length) = body.size_hint().exact() {
                    parts.headers.insert(CONTENT_LENGTH, length.into());
                }
            }
            PayloadSize::Empty
        };

        if !keep_alive {
            parts.headers.insert(CONNECTION, CLOSE);
        }

        let header = Message::Header((Response::from_parts(parts, ()), size));
        if size.is_empty() {
            self.ops.send(header).await?;
        } else {
            self.ops.feed(header).await?;
            loop {
                match drive(body.frame(), pump, &mut self.ops).await? {
                    Some(Ok(frame)) => {
                        // trailers are not forwarded
                        let Ok(data) = frame.into_data() else { continue };
                        if !data.is_empty() {
                            self.ops.send(Message::Payload(PayloadItem::Chunk(data))).await?;
                        }
                    }
                    Some(Err(e)) => {
                        error!(cause = %e, "response body failed");
                        return Err(SendError::invalid_body(e).into());
                    }
                    None => break,
                }
            }
        }

        self.ops.feed(Message::Payload(PayloadItem::Eof)).await?;
        self.ops.complete_outbound(false).await?;
        Ok(keep_alive)
    }

    async fn reject(&mut self, status: StatusCode) {
        let mut head = Response::new(());
        *head.status_mut() = status;
        head.headers_mut().insert(CONNECTION, CLOSE);
        if let Err(e) = self.ops.send(Message::Header((head, PayloadSize::Empty))).await {
            debug!(cause = %e, "can't send error response");
        }
        self.ops.close().await;
    }
}

fn size_hint(size: PayloadSize) -> SizeHint {
    match size {
        PayloadSize::Length(length) => SizeHint::with_exact(length),
        PayloadSize::Empty => SizeHint::with_exact(0),
        PayloadSize::Chunked | PayloadSize::UntilClose => SizeHint::new(),
    }
}

fn copy_head(head: &RequestHead) -> RequestHead {
    let mut copy = Request::new(());
    *copy.method_mut() = head.method().clone();
    *copy.uri_mut() = head.uri().clone();
    *copy.version_mut() = head.version();
    *copy.headers_mut() = head.headers().clone();
    copy
}

fn boxed<B>(body: B) -> BoxBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

fn error_response(status: StatusCode) -> Response<BoxBody> {
    let mut response = Response::new(Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use crate::pipeline::CompressionPredicate;
    use http_body_util::Full;
    use indoc::indoc;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    async fn serve<H>(handler: H, compression: Option<CompressionPolicy>) -> DuplexStream
    where
        H: Handler<Inbound<Bytes>> + 'static,
        H::Error: Send,
    {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (local, remote) = duplex(64 * 1024);
        let connection = ServerConnection::new(local, Connection::new(None, None), CodecConfig::default(), ConnectionHooks::new())
            .with_compression(compression);
        tokio::spawn(connection.process(Arc::new(handler)));
        remote
    }

    async fn read_until_closed(mut remote: DuplexStream) -> String {
        let mut out = Vec::new();
        remote.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn echo() -> impl Handler<Inbound<Bytes>, Error: Send> {
        make_handler(|request: Request<Inbound<Bytes>>| async move {
            let body = request.into_body().aggregate().await?;
            Ok::<_, ChannelError>(Response::new(Full::new(body)))
        })
    }

    #[tokio::test]
    async fn echoes_body_and_keeps_alive() {
        let mut remote = serve(echo(), None).await;
        remote
            .write_all(indoc! {b"
                POST /echo HTTP/1.1\r
                Content-Length: 5\r
                \r
                helloGET /again HTTP/1.1\r
                Connection: close\r
                \r
                "})
            .await
            .unwrap();

        let text = read_until_closed(remote).await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello"));
        assert!(text.contains("connection: close\r\ncontent-length: 0\r\n\r\n"));
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_the_next_request() {
        let handler = make_handler(|_request: Request<Inbound<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ok"))))
        });
        let mut remote = serve(handler, None).await;
        remote
            .write_all(b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let text = read_until_closed(remote).await;
        assert_eq!(text.matches("\r\n\r\nok").count(), 2);
    }

    #[tokio::test]
    async fn expect_continue_gets_an_interim_response() {
        let mut remote = serve(echo(), None).await;
        remote
            .write_all(b"PUT /up HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi")
            .await
            .unwrap();

        let text = read_until_closed(remote).await;
        assert!(text.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[tokio::test]
    async fn malformed_request_gets_bad_request() {
        let mut remote = serve(echo(), None).await;
        remote.write_all(b"GET / HTTP/9.9\r\n\r\n").await.unwrap();

        let text = read_until_closed(remote).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\nconnection: close\r\n"));
    }

    #[tokio::test]
    async fn handler_error_is_internal_server_error() {
        let handler = make_handler(|_request: Request<Inbound<Bytes>>| async {
            Err::<Response<Full<Bytes>>, _>(ChannelError::Closed)
        });
        let mut remote = serve(handler, None).await;
        remote.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

        assert!(read_until_closed(remote).await.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn head_keeps_the_content_length_without_a_body() {
        let handler = make_handler(|_request: Request<Inbound<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"twelve bytes"))))
        });
        let mut remote = serve(handler, None).await;
        remote.write_all(b"HEAD / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

        assert_eq!(read_until_closed(remote).await, "HTTP/1.1 200 OK\r\ncontent-length: 12\r\nconnection: close\r\n\r\n");
    }

    #[tokio::test]
    async fn compression_policy_applies_to_responses() {
        let always: CompressionPredicate = Arc::new(|_, _| true);
        let handler = make_handler(|_request: Request<Inbound<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"reply"))))
        });
        let mut remote = serve(handler, CompressionPolicy::new(None, Some(always))).await;
        remote.write_all(b"GET / HTTP/1.1\r\nAccept-Encoding: gzip\r\nConnection: close\r\n\r\n").await.unwrap();

        let text = read_until_closed(remote).await;
        assert!(text.contains("content-encoding: gzip\r\n"));
        assert!(text.contains("transfer-encoding: chunked\r\n"));
    }

    #[tokio::test]
    async fn upgrade_hands_over_the_socket() {
        let handler = make_handler(|request: Request<Inbound<Bytes>>| async move {
            let on_upgrade = request.extensions().get::<OnUpgrade>().cloned().unwrap();
            tokio::spawn(async move {
                let mut upgraded = on_upgrade.upgraded().await.unwrap();
                let mut buf = [0; 4];
                upgraded.read_exact(&mut buf).await.unwrap();
                upgraded.write_all(&buf).await.unwrap();
            });
            let response = Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header(CONNECTION, "upgrade")
                .header("upgrade", "echo")
                .body(Empty::<Bytes>::new())
                .unwrap();
            Ok::<_, Infallible>(response)
        });
        let mut remote = serve(handler, None).await;
        remote.write_all(b"GET / HTTP/1.1\r\nConnection: upgrade\r\nUpgrade: echo\r\n\r\nping").await.unwrap();

        let text = read_until_closed(remote).await;
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.ends_with("\r\n\r\nping"));
    }
}
