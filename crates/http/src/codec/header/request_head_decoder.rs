//! Request head decoder: request line and header fields.
//!
//! Headers are parsed zero-copy with `httparse`: the decoder records byte
//! ranges first, splits the head off the buffer once and slices every value
//! out of that shared buffer.
//!
//! The payload framing follows RFC 9112 section 6: `transfer-encoding` ending
//! in `chunked` means a chunked body, otherwise `content-length` decides, and a
//! request carrying neither has no body.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::Request;
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::parse::{self, EMPTY_HEADER_INDEX_ARRAY, HeaderIndex};
use crate::codec::config::{CodecConfig, MAX_HEADER_NUM};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHead};

/// Shortest request that can be complete: `GET / HTTP/1.1\r\n\r\n` minus the path.
const MIN_REQUEST_LEN: usize = 14;

#[derive(Debug, Clone)]
pub struct RequestHeadDecoder {
    config: CodecConfig,
}

impl RequestHeadDecoder {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl Default for RequestHeadDecoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for RequestHeadDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let max_line = self.config.max_initial_line_length;
        let max_header = self.config.max_header_size;

        let Some(line_len) = parse::initial_line_len(src, max_line)? else {
            return Ok(None);
        };
        if src.len() < MIN_REQUEST_LEN {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header<'_>>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let parsed = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        match parsed {
            Status::Complete(body_offset) => {
                trace!(head_size = body_offset, "parsed request head");
                let header_size = body_offset - line_len;
                ensure!(header_size <= max_header, ParseError::too_large_header(header_size, max_header));

                let header_count = req.headers.len();
                let mut header_index = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, req.headers, &mut header_index);

                let version = parse::parse_version(req.version)?;
                let method = req.method.ok_or(ParseError::InvalidMethod)?;
                let path = req.path.ok_or(ParseError::InvalidUri)?;

                let mut head = Request::builder()
                    .method(method)
                    .uri(path)
                    .version(version)
                    .body(())
                    .map_err(|_| ParseError::InvalidUri)?;

                let head_bytes = src.split_to(body_offset).freeze();
                parse::fill_headers(head.headers_mut(), &head_bytes, &header_index[..header_count], self.config.validate_headers)?;

                let payload_size = request_payload_size(&head)?;
                Ok(Some((head, payload_size)))
            }
            Status::Partial => {
                let header_size = src.len() - line_len;
                ensure!(header_size <= max_header, ParseError::too_large_header(header_size, max_header));
                Ok(None)
            }
        }
    }
}

fn request_payload_size(head: &RequestHead) -> Result<PayloadSize, ParseError> {
    let te = parse::transfer_encoding(head.headers());
    let cl = parse::content_length(head.headers())?;

    match (te, cl) {
        (None, None | Some(0)) => Ok(PayloadSize::Empty),
        (None, Some(length)) => Ok(PayloadSize::Length(length)),
        (te @ Some(_), None) if parse::is_chunked(te) => Ok(PayloadSize::Chunked),
        (Some(_), None) => Err(ParseError::invalid_body("request transfer-encoding must end with chunked")),
        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method, Version};
    use indoc::indoc;

    fn decode(text: &str) -> Result<Option<(RequestHead, PayloadSize)>, ParseError> {
        RequestHeadDecoder::default().decode(&mut BytesMut::from(text))
    }

    #[test]
    fn leaves_body_in_buffer() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let mut bytes = BytesMut::from(str);
        let result = RequestHeadDecoder::default().decode(&mut bytes).unwrap();

        assert!(result.is_some());
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html?a=1 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let (head, payload_size) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.uri().path(), "/index.html");
        assert_eq!(head.uri().query(), Some("a=1"));
        assert_eq!(head.headers().len(), 3);
        assert_eq!(head.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
    }

    #[test]
    fn payload_framing() {
        let chunked = indoc! {r##"
        POST /upload HTTP/1.1
        Transfer-Encoding: gzip, chunked

        "##};
        assert_eq!(decode(chunked).unwrap().unwrap().1, PayloadSize::Chunked);

        let sized = indoc! {r##"
        POST /upload HTTP/1.1
        Content-Length: 42

        "##};
        assert_eq!(decode(sized).unwrap().unwrap().1, PayloadSize::Length(42));

        let both = indoc! {r##"
        POST /upload HTTP/1.1
        Content-Length: 42
        Transfer-Encoding: chunked

        "##};
        assert!(matches!(decode(both), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn partial_head_waits_for_more() {
        assert!(decode("GET /index.html HTTP/1.1\r\nHost: exa").unwrap().is_none());
    }

    #[test]
    fn too_large_header_section() {
        let config = CodecConfig { max_header_size: 32, initial_buffer_size: 16, ..CodecConfig::default() };
        let mut decoder = RequestHeadDecoder::new(config);
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");

        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn too_long_request_line() {
        let config = CodecConfig { max_initial_line_length: 16, ..CodecConfig::default() };
        let mut decoder = RequestHeadDecoder::new(config);
        let mut buf = BytesMut::from("GET /a/very/long/path HTTP/1.1\r\n\r\n");

        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLongInitialLine { max_size: 16, .. })));
    }

    #[test]
    fn lenient_decoding_keeps_raw_bytes() {
        let text = "GET / HTTP/1.1\r\nX-Raw: caf\u{e9}\r\n\r\n";
        let lenient = CodecConfig { validate_headers: false, ..CodecConfig::default() };

        let (head, _) = RequestHeadDecoder::new(lenient).decode(&mut BytesMut::from(text)).unwrap().unwrap();
        assert_eq!(head.headers().get("x-raw").unwrap().as_bytes(), "caf\u{e9}".as_bytes());
    }

    #[test]
    fn unsupported_version() {
        assert!(matches!(decode("GET / HTTP/2.0\r\n\r\n"), Err(ParseError::InvalidHeader { .. } | ParseError::InvalidVersion(_))));
    }
}
