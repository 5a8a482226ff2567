//! Websocket upgrade for both ends of a connection.
//!
//! Sub-protocols are negotiated from comma separated lists. The first entry
//! of the requesting side's list that the answering side supports wins; a `*`
//! on the answering side accepts any entry. When both sides name protocols
//! but share none, the upgrade answers without a protocol, the server
//! handler never runs and the client fails with
//! [`WebsocketError::Negotiation`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use ripple_http::channel::{OnUpgrade, Upgraded};
use ripple_http::protocol::ResponseHead;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as ProtocolError, Message, handshake};
use tracing::{debug, warn};

use crate::body::ResponseBody;
use crate::error::WebsocketError;

const VERSION: &str = "13";

/// Picks the first `requested` entry that `supported` accepts.
pub fn negotiate(requested: &str, supported: &str) -> Option<String> {
    let supported: Vec<&str> = entries(supported).collect();
    let wildcard = supported.contains(&"*");
    entries(requested).find(|candidate| wildcard || supported.contains(candidate)).map(str::to_string)
}

fn entries(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn header_contains(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Answers a websocket upgrade request.
///
/// Returns the `101 Switching Protocols` response to send back; once it is
/// written, `handler` runs on its own task with the stream and the selected
/// protocol. `protocols` lists what this server speaks, empty for none.
pub fn upgrade<B, F, Fut>(request: &Request<B>, protocols: &str, handler: F) -> Result<Response<ResponseBody>, WebsocketError>
where
    F: FnOnce(WebSocketStream<Upgraded>, Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let headers = request.headers();
    if !header_contains(headers, CONNECTION, "upgrade") || !header_contains(headers, UPGRADE, "websocket") {
        return Err(WebsocketError::handshake("not a websocket upgrade request"));
    }
    if headers.get(SEC_WEBSOCKET_VERSION).is_none_or(|version| version != VERSION) {
        return Err(WebsocketError::handshake("unsupported websocket version"));
    }
    let key = headers.get(SEC_WEBSOCKET_KEY).ok_or_else(|| WebsocketError::handshake("missing sec-websocket-key"))?;
    let on_upgrade = request
        .extensions()
        .get::<OnUpgrade>()
        .cloned()
        .ok_or_else(|| WebsocketError::handshake("connection can't be upgraded"))?;

    let requested = headers.get(SEC_WEBSOCKET_PROTOCOL).and_then(|value| value.to_str().ok()).filter(|value| !value.trim().is_empty());
    let selected = requested.and_then(|requested| negotiate(requested, protocols));

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, handshake::derive_accept_key(key.as_bytes()));
    if let Some(protocol) = &selected {
        response = response.header(SEC_WEBSOCKET_PROTOCOL, protocol.as_str());
    }
    let response = response.body(ResponseBody::empty()).map_err(WebsocketError::handshake)?;

    if let (Some(requested), None) = (requested, &selected) {
        warn!(requested, supported = protocols, "no common websocket sub-protocol");
        return Ok(response);
    }

    tokio::spawn(async move {
        match on_upgrade.upgraded().await {
            Ok(upgraded) => {
                debug!(connection_id = upgraded.connection().id(), protocol = ?selected, "websocket established");
                let stream = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                handler(stream, selected).await;
            }
            Err(e) => debug!(cause = %e, "websocket upgrade was abandoned"),
        }
    });
    Ok(response)
}

pub(crate) fn generate_key() -> String {
    handshake::client::generate_key()
}

/// Headers asking for an upgrade with `key`, offering `protocols`.
pub(crate) fn client_headers(key: &str, protocols: &str) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (CONNECTION, HeaderValue::from_static("upgrade")),
        (UPGRADE, HeaderValue::from_static("websocket")),
        (SEC_WEBSOCKET_VERSION, HeaderValue::from_static(VERSION)),
    ];
    if let Ok(key) = HeaderValue::from_str(key) {
        headers.push((SEC_WEBSOCKET_KEY, key));
    }
    if entries(protocols).next().is_some() {
        match HeaderValue::from_str(protocols) {
            Ok(value) => headers.push((SEC_WEBSOCKET_PROTOCOL, value)),
            Err(e) => debug!(cause = %e, protocols, "sub-protocol list is not a valid header value"),
        }
    }
    headers
}

pub(crate) fn selected_protocol(head: &ResponseHead) -> Option<String> {
    head.headers().get(SEC_WEBSOCKET_PROTOCOL).and_then(|value| value.to_str().ok()).map(str::to_string)
}

/// Checks the server's answer to an upgrade request made with `key`.
pub(crate) fn verify_response(head: &ResponseHead, key: &str, protocols: &str) -> Result<(), WebsocketError> {
    if head.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebsocketError::handshake(format!("unexpected status code: {}", head.status())));
    }
    let headers = head.headers();
    if !header_contains(headers, UPGRADE, "websocket") {
        return Err(WebsocketError::handshake("invalid upgrade header"));
    }
    let expected = handshake::derive_accept_key(key.as_bytes());
    match headers.get(SEC_WEBSOCKET_ACCEPT) {
        Some(accept) if accept == expected.as_str() => {}
        Some(accept) => return Err(WebsocketError::handshake(format!("invalid accept key: {accept:?}"))),
        None => return Err(WebsocketError::handshake("missing accept key")),
    }

    let actual = selected_protocol(head);
    let requested = entries(protocols).next().is_some();
    let accepted = match actual.as_deref() {
        Some(actual) => entries(protocols).any(|candidate| candidate == actual),
        None => !requested,
    };
    if accepted {
        Ok(())
    } else {
        Err(WebsocketError::Negotiation { actual, expected: protocols.to_string() })
    }
}

/// A client websocket after a successful handshake.
///
/// It is a [`Stream`] of incoming messages and a [`Sink`] for outgoing ones.
pub struct WebsocketSession {
    stream: WebSocketStream<Upgraded>,
    protocol: Option<String>,
    head: ResponseHead,
}

impl WebsocketSession {
    pub(crate) fn new(stream: WebSocketStream<Upgraded>, protocol: Option<String>, head: ResponseHead) -> Self {
        Self { stream, protocol, head }
    }

    /// The sub-protocol the server selected.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The `101 Switching Protocols` head.
    pub fn response(&self) -> &ResponseHead {
        &self.head
    }

    pub fn into_inner(self) -> WebSocketStream<Upgraded> {
        self.stream
    }
}

impl Stream for WebsocketSession {
    type Item = Result<Message, ProtocolError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl Sink<Message> for WebsocketSession {
    type Error = ProtocolError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.stream).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        Pin::new(&mut self.stream).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.stream).poll_close(cx)
    }
}

impl fmt::Debug for WebsocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketSession").field("protocol", &self.protocol).field("status", &self.head.status()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_requested_supported_entry_wins() {
        assert_eq!(negotiate("Common,OTHER", "NOT, Common").as_deref(), Some("Common"));
        assert_eq!(negotiate("proto1, proto2", "proto2,*").as_deref(), Some("proto1"));
        assert_eq!(negotiate("a,b", "b,a").as_deref(), Some("a"));
        assert_eq!(negotiate("SUBPROTOCOL,OTHER", "protoA,protoB"), None);
        assert_eq!(negotiate("SUBPROTOCOL", ""), None);
        assert_eq!(negotiate("", "*"), None);
    }

    fn switching(key: &str, protocol: Option<&'static str>) -> ResponseHead {
        let mut head = Response::new(());
        *head.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        head.headers_mut().insert(UPGRADE, HeaderValue::from_static("websocket"));
        head.headers_mut().insert(SEC_WEBSOCKET_ACCEPT, HeaderValue::from_str(&handshake::derive_accept_key(key.as_bytes())).unwrap());
        if let Some(protocol) = protocol {
            head.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
        }
        head
    }

    #[test]
    fn missing_protocol_is_a_negotiation_failure() {
        let key = generate_key();
        let error = verify_response(&switching(&key, None), &key, "SUBPROTOCOL,OTHER").unwrap_err();
        assert_eq!(error.to_string(), "Invalid subprotocol. Actual: null. Expected one of: SUBPROTOCOL,OTHER");
    }

    #[test]
    fn unrequested_protocol_is_a_negotiation_failure() {
        let key = generate_key();
        let error = verify_response(&switching(&key, Some("proto9")), &key, "proto1,proto2").unwrap_err();
        assert_eq!(error.to_string(), "Invalid subprotocol. Actual: proto9. Expected one of: proto1,proto2");

        let error = verify_response(&switching(&key, Some("proto9")), &key, "").unwrap_err();
        assert!(matches!(error, WebsocketError::Negotiation { .. }));
    }

    #[test]
    fn matching_answers_pass() {
        let key = generate_key();
        verify_response(&switching(&key, Some("proto2")), &key, "proto1, proto2").unwrap();
        verify_response(&switching(&key, None), &key, "").unwrap();
    }

    #[test]
    fn wrong_accept_key_fails_the_handshake() {
        let key = generate_key();
        let error = verify_response(&switching("another-key", None), &key, "").unwrap_err();
        assert!(matches!(error, WebsocketError::Handshake { .. }));

        let mut refused = switching(&key, None);
        *refused.status_mut() = StatusCode::FORBIDDEN;
        assert!(matches!(verify_response(&refused, &key, ""), Err(WebsocketError::Handshake { .. })));
    }

    #[test]
    fn client_headers_offer_protocols_only_when_given() {
        let with = client_headers("dGhlIHNhbXBsZSBub25jZQ==", "a,b");
        assert!(with.iter().any(|(name, value)| name == SEC_WEBSOCKET_PROTOCOL && value == "a,b"));
        assert!(with.iter().any(|(name, value)| name == SEC_WEBSOCKET_KEY && value == "dGhlIHNhbXBsZSBub25jZQ=="));

        let without = client_headers("dGhlIHNhbXBsZSBub25jZQ==", " ");
        assert!(!without.iter().any(|(name, _)| name == SEC_WEBSOCKET_PROTOCOL));
    }

    #[test]
    fn upgrade_rejects_plain_requests() {
        let request = Request::new(());
        let result = upgrade(&request, "", |_, _| async {});
        assert!(matches!(result, Err(WebsocketError::Handshake { .. })));
    }

    #[test]
    fn upgrade_without_upgradable_connection_fails() {
        let request = Request::builder()
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();
        let result = upgrade(&request, "", |_, _| async {});
        assert!(matches!(result, Err(WebsocketError::Handshake { .. })));
    }
}
