//! Message head codecs for both ends of a connection.
//!
//! - [`RequestHeadDecoder`] / [`ResponseHeadEncoder`] run on the server
//! - [`RequestHeadEncoder`] / [`ResponseHeadDecoder`] run on the client
//!
//! Decoders enforce the initial line and header section limits of
//! [`CodecConfig`](crate::codec::CodecConfig) and pick the payload framing;
//! encoders rewrite `content-length` / `transfer-encoding` to match the
//! framing they are given.

mod parse;
mod request_head_decoder;
mod request_head_encoder;
mod response_head_decoder;
mod response_head_encoder;

pub use request_head_decoder::RequestHeadDecoder;
pub use request_head_encoder::RequestHeadEncoder;
pub use response_head_decoder::ResponseHeadDecoder;
pub use response_head_encoder::ResponseHeadEncoder;
