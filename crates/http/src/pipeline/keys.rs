//! Attribute keys read by the [`PipelineAssembler`](super::PipelineAssembler).
//!
//! Every key is read and cleared exactly once per assembly pass; the
//! defaults apply when a key was never set.

use crate::attr::AttributeKey;
use crate::pipeline::compression::CompressionPredicate;

/// Smallest response, in bytes, the server compresses. Absent means no size based compression.
pub const COMPRESSION_MIN_SIZE: AttributeKey<usize> = AttributeKey::new("compression_min_size");

/// Decides per exchange whether the server compresses the response.
pub const COMPRESSION_PREDICATE: AttributeKey<CompressionPredicate> = AttributeKey::new("compression_predicate");

pub const MAX_INITIAL_LINE_LENGTH: AttributeKey<usize> = AttributeKey::new("max_initial_line_length");

pub const MAX_HEADER_SIZE: AttributeKey<usize> = AttributeKey::new("max_header_size");

pub const MAX_CHUNK_SIZE: AttributeKey<usize> = AttributeKey::new("max_chunk_size");

pub const VALIDATE_HEADERS: AttributeKey<bool> = AttributeKey::new("validate_headers");

pub const INITIAL_BUFFER_SIZE: AttributeKey<usize> = AttributeKey::new("initial_buffer_size");

/// Client: advertise `accept-encoding` and decode compressed responses.
pub const ACCEPT_COMPRESSION: AttributeKey<bool> = AttributeKey::new("accept_compression");

/// Client: follow 3xx redirects with a `location` header.
pub const FOLLOW_REDIRECT: AttributeKey<bool> = AttributeKey::new("follow_redirect");

/// Client: stream bodies of unknown size chunked instead of buffering them.
pub const CHUNKED_TRANSFER: AttributeKey<bool> = AttributeKey::new("chunked_transfer");

pub const DEFAULT_FOLLOW_REDIRECT: bool = false;
pub const DEFAULT_CHUNKED_TRANSFER: bool = true;
pub const DEFAULT_ACCEPT_COMPRESSION: bool = false;
