//! HTTP/1.1 codecs.
//!
//! - [`RequestDecoder`] and [`ResponseEncoder`] are the server half
//! - [`RequestEncoder`] and [`ResponseDecoder`] are the client half
//! - [`ServerCodec`] and [`ClientCodec`] combine them for a framed connection
//!
//! Heads are parsed with `httparse` and bounded by [`CodecConfig`]; payloads
//! are streamed as [`PayloadItem`](crate::protocol::PayloadItem)s.
//!
//! ```
//! use bytes::BytesMut;
//! use ripple_http::codec::{CodecConfig, ServerCodec};
//! use ripple_http::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = ServerCodec::new(CodecConfig::default());
//! let mut buffer = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let message = codec.decode(&mut buffer).unwrap();
//! assert!(matches!(message, Some(Message::Header(_))));
//! ```

mod body;
mod config;
mod duplex;
mod header;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;
mod writer;

pub use config::{
    CodecConfig, DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_INITIAL_LINE_LENGTH,
    DEFAULT_VALIDATE_HEADERS, MAX_HEADER_NUM,
};
pub use duplex::{ClientCodec, ServerCodec};
pub use header::{RequestHeadDecoder, RequestHeadEncoder, ResponseHeadDecoder, ResponseHeadEncoder};
pub use request_decoder::RequestDecoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;
pub use response_encoder::ResponseEncoder;
