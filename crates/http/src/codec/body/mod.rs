//! Payload codecs for the three HTTP/1.1 framings: `content-length`,
//! `transfer-encoding: chunked` and read-until-close.
//!
//! Decoders never hand out more than `max_chunk_size` bytes per item.

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;
mod until_close_decoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
