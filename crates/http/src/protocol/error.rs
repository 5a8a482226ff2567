use std::error::Error;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Boxed error used for handler and hook failures.
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("channel error: {source}")]
    ChannelError {
        #[from]
        source: ChannelError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("initial line too long, current: {current_size} exceed the limit {max_size}")]
    TooLongInitialLine { current_size: usize, max_size: usize },

    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid http status")]
    InvalidStatus,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_long_initial_line(current_size: usize, max_size: usize) -> Self {
        Self::TooLongInitialLine { current_size, max_size }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Raised while a configuration chain is materialized or a pipeline is assembled,
/// always before any socket is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid threshold `{name}`: {reason}")]
    InvalidThreshold { name: &'static str, reason: String },

    #[error("event loop group `{name}` is not usable: {reason}")]
    InvalidEventLoopGroup { name: String, reason: String },

    #[error("missing address: {reason}")]
    MissingAddress { reason: String },

    #[error("pipeline stage `{stage}` can't be installed after `{previous}`")]
    PipelineOrder { stage: &'static str, previous: &'static str },

    #[error("configuration transform failed: {reason}")]
    Transform { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ConfigError {
    pub fn invalid_threshold<S: ToString>(name: &'static str, reason: S) -> Self {
        Self::InvalidThreshold { name, reason: reason.to_string() }
    }

    pub fn invalid_group<N: ToString, S: ToString>(name: N, reason: S) -> Self {
        Self::InvalidEventLoopGroup { name: name.to_string(), reason: reason.to_string() }
    }

    pub fn missing_address<S: ToString>(reason: S) -> Self {
        Self::MissingAddress { reason: reason.to_string() }
    }

    pub fn transform<S: ToString>(reason: S) -> Self {
        Self::Transform { reason: reason.to_string() }
    }
}

/// A caller supplied hook failed or panicked.
#[derive(Error, Debug)]
#[error("{phase} hook failed: {message}")]
pub struct HookError {
    pub phase: &'static str,
    pub message: String,
}

impl HookError {
    pub fn new<S: ToString>(phase: &'static str, message: S) -> Self {
        Self { phase, message: message.to_string() }
    }
}

/// Terminal failures observed on a connection's inbound or outbound handle.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("protocol error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error(transparent)]
    Hook {
        #[from]
        source: HookError,
    },
}

impl ChannelError {
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool for {address} is saturated: {max_connections} connections in use, {pending} pending")]
    Saturated { address: SocketAddr, max_connections: usize, pending: usize },

    #[error("timed out acquiring a connection for {address}")]
    Timeout { address: SocketAddr },

    #[error("pool has been disposed")]
    Disposed,

    #[error("connect error: {source}")]
    Connect {
        #[from]
        source: io::Error,
    },
}
