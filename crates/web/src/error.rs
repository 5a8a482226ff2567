use std::io;

use http::StatusCode;

use ripple_http::protocol::{ChannelError, ConfigError, HookError, PoolError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid server configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("bind server error: {source}")]
    Bind { source: io::Error },

    #[error("no handler configured")]
    MissingHandler,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid client configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("connect error: {source}")]
    Connect { source: io::Error },

    #[error(transparent)]
    Pool {
        #[from]
        source: PoolError,
    },

    #[error(transparent)]
    Channel {
        #[from]
        source: ChannelError,
    },

    #[error(transparent)]
    Hook {
        #[from]
        source: HookError,
    },

    #[error(transparent)]
    Redirect {
        #[from]
        source: RedirectError,
    },

    #[error(transparent)]
    Websocket {
        #[from]
        source: WebsocketError,
    },

    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid request: {source}")]
    Request {
        #[from]
        source: http::Error,
    },

    #[error("request body was already sent and can't be replayed")]
    BodyConsumed,
}

impl ClientError {
    pub fn invalid_uri<U: ToString, S: ToString>(uri: U, reason: S) -> Self {
        Self::InvalidUri { uri: uri.to_string(), reason: reason.to_string() }
    }

    /// Whether the failure happened on the transport, before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Channel { source: ChannelError::Closed | ChannelError::Io { .. } })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RedirectError {
    #[error("too many redirects: gave up after {max} hops, next location `{location}`")]
    TooManyRedirects { max: usize, location: String },

    #[error("redirect cycle detected at `{location}`")]
    Cycle { location: String },

    #[error("invalid redirect location `{location}`: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("{status} to `{location}` needs the request body again, but it was streamed")]
    BodyNotReplayable { status: StatusCode, location: String },
}

#[derive(Error, Debug)]
pub enum WebsocketError {
    #[error("Invalid subprotocol. Actual: {}. Expected one of: {expected}", actual.as_deref().unwrap_or("null"))]
    Negotiation { actual: Option<String>, expected: String },

    #[error("websocket handshake failed: {reason}")]
    Handshake { reason: String },

    #[error(transparent)]
    Channel {
        #[from]
        source: ChannelError,
    },

    #[error("websocket protocol error: {source}")]
    Protocol { source: Box<tungstenite::Error> },
}

impl WebsocketError {
    pub fn handshake<S: ToString>(reason: S) -> Self {
        Self::Handshake { reason: reason.to_string() }
    }
}

impl From<tungstenite::Error> for WebsocketError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Protocol { source: Box::new(e) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_message_names_both_sides() {
        let error = WebsocketError::Negotiation { actual: None, expected: "SUBPROTOCOL,OTHER".to_string() };
        assert_eq!(error.to_string(), "Invalid subprotocol. Actual: null. Expected one of: SUBPROTOCOL,OTHER");

        let error = WebsocketError::Negotiation { actual: Some("proto-x".to_string()), expected: "a,b".to_string() };
        assert_eq!(error.to_string(), "Invalid subprotocol. Actual: proto-x. Expected one of: a,b");
    }

    #[test]
    fn unreplayable_redirect_names_status_and_location() {
        let error = RedirectError::BodyNotReplayable { status: StatusCode::TEMPORARY_REDIRECT, location: "http://localhost/echo".into() };
        assert_eq!(error.to_string(), "307 Temporary Redirect to `http://localhost/echo` needs the request body again, but it was streamed");
    }

    #[test]
    fn only_transport_failures_are_transport() {
        assert!(ClientError::from(ChannelError::Closed).is_transport());
        assert!(!ClientError::BodyConsumed.is_transport());
        assert!(!ClientError::from(RedirectError::Cycle { location: "/".into() }).is_transport());
    }
}
