use bytes::Bytes;
use http::{Request, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tracing::{debug, trace};

use super::pump::BodyPump;
use crate::channel::{ChannelOperations, Connection, ConnectionHooks, InboundSender, UpgradeIo, Upgraded};
use crate::codec::{ClientCodec, CodecConfig};
use crate::protocol::{BoxBody, ChannelError, Message, ParseError, PayloadItem, PayloadSize, RequestHead, ResponseHead, SendError, is_keep_alive};
use crate::resources::Reusable;

type RequestMessage = Message<(RequestHead, PayloadSize), Bytes>;

/// Runs request/response exchanges over one client connection.
///
/// An exchange is [`send_request`](Self::send_request), then
/// [`receive_head`](Self::receive_head), then either
/// [`pump_body`](Self::pump_body) or [`discard_body`](Self::discard_body).
/// Only a connection whose last exchange ran to completion is reusable.
pub struct ClientConnection<IO> {
    ops: ChannelOperations<IO, ClientCodec, RequestMessage>,
    keep_alive: bool,
    exchanges: usize,
}

impl<IO: UpgradeIo> ClientConnection<IO> {
    pub fn new(io: IO, connection: Connection, config: CodecConfig, hooks: ConnectionHooks) -> Self {
        let ops = ChannelOperations::new(io, ClientCodec::new(config), config.initial_buffer_size, connection, hooks);
        Self { ops, keep_alive: true, exchanges: 0 }
    }

    pub fn connection(&self) -> &Connection {
        self.ops.connection()
    }

    /// Number of requests sent so far.
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn on_active(&mut self) -> Result<(), ChannelError> {
        self.ops.on_active()
    }

    /// Writes the request head and body.
    ///
    /// A body of unknown size goes out chunked; with `chunked` off it is
    /// collected first and sent with a `content-length`.
    pub async fn send_request(&mut self, request: Request<BoxBody>, chunked: bool) -> Result<(), ChannelError> {
        let (parts, mut body) = request.into_parts();
        if self.exchanges > 0 {
            self.ops.reactivate();
        }
        self.exchanges += 1;
        self.keep_alive = is_keep_alive(parts.version, &parts.headers);

        let (size, collected) = match PayloadSize::from_size_hint(&body.size_hint()) {
            PayloadSize::Chunked if !chunked || parts.version == Version::HTTP_10 => {
                let bytes = match (&mut body).collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) => return Err(SendError::invalid_body(e).into()),
                };
                let size = if bytes.is_empty() { PayloadSize::Empty } else { PayloadSize::Length(bytes.len() as u64) };
                (size, Some(bytes))
            }
            size => (size, None),
        };
        trace!(connection_id = self.ops.connection().id(), method = %parts.method, uri = %parts.uri, ?size, "sending request");

        let header = Message::Header((Request::from_parts(parts, ()), size));
        if size.is_empty() {
            self.ops.send(header).await?;
        } else {
            self.ops.feed(header).await?;
            if let Some(bytes) = collected {
                self.ops.send(Message::Payload(PayloadItem::Chunk(bytes))).await?;
            } else {
                while let Some(frame) = body.frame().await {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(cause = %e, "request body failed");
                            self.ops.close().await;
                            return Err(SendError::invalid_body(e).into());
                        }
                    };
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            self.ops.send(Message::Payload(PayloadItem::Chunk(data))).await?;
                        }
                    }
                }
            }
        }
        self.ops.feed(Message::Payload(PayloadItem::Eof)).await?;
        self.ops.complete_outbound(false).await
    }

    /// Reads the next final response head; interim 1xx responses are skipped by the codec.
    pub async fn receive_head(&mut self) -> Result<(ResponseHead, PayloadSize), ChannelError> {
        match self.ops.receive().await {
            Some(Ok(Message::Header((head, size)))) => {
                self.keep_alive &= is_keep_alive(head.version(), head.headers()) && size != PayloadSize::UntilClose;
                trace!(connection_id = self.ops.connection().id(), status = %head.status(), ?size, "response received");
                Ok((head, size))
            }
            Some(Ok(Message::Payload(_))) => {
                self.ops.close().await;
                Err(ParseError::invalid_body("payload received before a response head").into())
            }
            Some(Err(e)) => {
                self.ops.close().await;
                Err(e)
            }
            None => Err(ChannelError::Closed),
        }
    }

    /// Feeds the response payload to `sender` as its consumer demands it.
    ///
    /// Returns once the payload ended or the consumer went away; in the
    /// second case the connection is no longer reusable.
    pub async fn pump_body(&mut self, sender: InboundSender<Bytes>) -> Result<(), ChannelError> {
        let mut pump = BodyPump::new(sender);
        while !pump.is_finished() {
            let demand = pump.demand().await;
            if demand.is_none() {
                self.keep_alive = false;
                return Ok(());
            }
            pump.serve(demand, &mut self.ops).await?;
        }
        Ok(())
    }

    /// Reads and drops the response payload.
    pub async fn discard_body(&mut self) -> Result<(), ChannelError> {
        BodyPump::detached().drain(&mut self.ops).await
    }

    pub async fn close(&mut self) {
        self.ops.close().await;
    }

    pub fn into_upgraded(self) -> Upgraded {
        self.ops.into_upgraded()
    }
}

impl<IO: UpgradeIo> Reusable for ClientConnection<IO> {
    fn is_reusable(&self) -> bool {
        self.keep_alive
            && !self.ops.is_closed()
            && !self.ops.connection().is_disposed()
            && self.ops.codec().pending_responses() == 0
            && !self.ops.codec().in_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use indoc::indoc;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    fn client() -> (ClientConnection<DuplexStream>, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        let mut client = ClientConnection::new(local, Connection::new(None, None), CodecConfig::default(), ConnectionHooks::new());
        client.on_active().unwrap();
        (client, remote)
    }

    fn request(method: Method, body: &'static str) -> Request<BoxBody> {
        let body = Full::new(Bytes::from_static(body.as_bytes())).map_err(|e: Infallible| match e {}).boxed_unsync();
        Request::builder().method(method).uri("/items").header("host", "localhost").body(body).unwrap()
    }

    async fn read_available(remote: &mut DuplexStream) -> String {
        let mut buf = vec![0; 4096];
        let n = remote.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn exchange_then_reuse() {
        let (mut client, mut remote) = client();

        client.send_request(request(Method::POST, "data"), true).await.unwrap();
        assert_eq!(read_available(&mut remote).await, "POST /items HTTP/1.1\r\nhost: localhost\r\ncontent-length: 4\r\n\r\ndata");
        assert!(!client.is_reusable());

        remote
            .write_all(indoc! {b"
                HTTP/1.1 200 OK\r
                Content-Length: 2\r
                \r
                ok"})
            .await
            .unwrap();
        let (head, size) = client.receive_head().await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(size, PayloadSize::Length(2));

        let (sender, body) = crate::channel::inbound();
        let (pumped, collected) = tokio::join!(client.pump_body(sender), body.aggregate());
        pumped.unwrap();
        assert_eq!(collected.unwrap(), "ok");
        assert!(client.is_reusable());
        assert_eq!(client.exchanges(), 1);
    }

    #[tokio::test]
    async fn dropping_the_body_consumer_spoils_reuse() {
        let (mut client, mut remote) = client();
        client.send_request(request(Method::GET, ""), true).await.unwrap();
        read_available(&mut remote).await;
        remote.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nabcd").await.unwrap();
        client.receive_head().await.unwrap();

        let (sender, body) = crate::channel::inbound::<Bytes>();
        drop(body);
        client.pump_body(sender).await.unwrap();
        assert!(!client.is_reusable());
    }

    #[tokio::test]
    async fn discarded_body_keeps_the_connection() {
        let (mut client, mut remote) = client();
        client.send_request(request(Method::GET, ""), true).await.unwrap();
        read_available(&mut remote).await;
        remote.write_all(b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 3\r\n\r\nbye").await.unwrap();

        let (head, _) = client.receive_head().await.unwrap();
        assert_eq!(head.headers()["location"], "/next");
        client.discard_body().await.unwrap();
        assert!(client.is_reusable());
    }

    #[tokio::test]
    async fn unknown_size_body_is_buffered_without_chunked_transfer() {
        let (mut client, mut remote) = client();
        let stream = futures::stream::iter(["ab", "cd"]).map(|s| Ok::<_, Infallible>(http_body::Frame::data(Bytes::from(s))));
        let body = http_body_util::StreamBody::new(stream).map_err(|e| match e {}).boxed_unsync();
        let request = Request::put("/blob").body(body).unwrap();

        client.send_request(request, false).await.unwrap();
        assert_eq!(read_available(&mut remote).await, "PUT /blob HTTP/1.1\r\ncontent-length: 4\r\n\r\nabcd");
    }

    #[tokio::test]
    async fn connection_close_response_is_not_reusable() {
        let (mut client, mut remote) = client();
        client.send_request(request(Method::GET, ""), true).await.unwrap();
        read_available(&mut remote).await;
        remote.write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await.unwrap();

        client.receive_head().await.unwrap();
        client.discard_body().await.unwrap();
        assert!(!client.is_reusable());
    }
}
