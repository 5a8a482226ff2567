//! Response head decoder for the client side.
//!
//! Unlike a request, a response can't be framed from its own headers alone:
//! the answer to a `HEAD` never has a body, and a response without length
//! information runs until the server closes the connection.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{Method, Response, StatusCode};
use httparse::{Error, Status};
use tracing::trace;

use super::parse::{self, EMPTY_HEADER_INDEX_ARRAY, HeaderIndex};
use crate::codec::config::{CodecConfig, MAX_HEADER_NUM};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ResponseHead, response_has_body};

/// `HTTP/1.1 200\r\n\r\n`
const MIN_RESPONSE_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ResponseHeadDecoder {
    config: CodecConfig,
}

impl ResponseHeadDecoder {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Parses one response head sent in answer to a `request_method` request.
    pub fn decode_for(&self, src: &mut BytesMut, request_method: &Method) -> Result<Option<(ResponseHead, PayloadSize)>, ParseError> {
        let max_line = self.config.max_initial_line_length;
        let max_header = self.config.max_header_size;

        let Some(line_len) = parse::initial_line_len(src, max_line)? else {
            return Ok(None);
        };
        if src.len() < MIN_RESPONSE_LEN {
            return Ok(None);
        }

        let mut res = httparse::Response::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header<'_>>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let parsed = httparse::ParserConfig::default().parse_response_with_uninit_headers(&mut res, src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        match parsed {
            Status::Complete(body_offset) => {
                let header_size = body_offset - line_len;
                ensure!(header_size <= max_header, ParseError::too_large_header(header_size, max_header));

                let header_count = res.headers.len();
                let mut header_index = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, res.headers, &mut header_index);

                let version = parse::parse_version(res.version)?;
                let status = res.code.and_then(|code| StatusCode::from_u16(code).ok()).ok_or(ParseError::InvalidStatus)?;
                trace!(status = status.as_u16(), head_size = body_offset, "parsed response head");

                let mut head = Response::new(());
                *head.status_mut() = status;
                *head.version_mut() = version;

                let head_bytes = src.split_to(body_offset).freeze();
                parse::fill_headers(head.headers_mut(), &head_bytes, &header_index[..header_count], self.config.validate_headers)?;

                let payload_size = response_payload_size(&head, request_method)?;
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

impl Default for ResponseHeadDecoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

fn response_payload_size(head: &ResponseHead, request_method: &Method) -> Result<PayloadSize, ParseError> {
    if !response_has_body(request_method, head.status()) {
        return Ok(PayloadSize::Empty);
    }

    // transfer-encoding overrides content-length on responses
    if let Some(te) = parse::transfer_encoding(head.headers()) {
        return Ok(if parse::is_chunked(Some(te)) { PayloadSize::Chunked } else { PayloadSize::UntilClose });
    }

    Ok(match parse::content_length(head.headers())? {
        Some(0) => PayloadSize::Empty,
        Some(length) => PayloadSize::Length(length),
        None => PayloadSize::UntilClose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Version;
    use indoc::indoc;

    fn decode(text: &str, method: &Method) -> (ResponseHead, PayloadSize) {
        ResponseHeadDecoder::default().decode_for(&mut BytesMut::from(text), method).unwrap().unwrap()
    }

    #[test]
    fn sized_response() {
        let str = indoc! {r##"
        HTTP/1.1 201 Created
        Content-Length: 5
        Content-Encoding: gzip

        hello"##};

        let mut buf = BytesMut::from(str);
        let (head, size) = ResponseHeadDecoder::default().decode_for(&mut buf, &Method::POST).unwrap().unwrap();

        assert_eq!(head.status(), StatusCode::CREATED);
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.headers().get(http::header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(size, PayloadSize::Length(5));
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn framing_depends_on_request_and_status() {
        let sized = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
        assert_eq!(decode(sized, &Method::HEAD).1, PayloadSize::Empty);
        assert_eq!(decode("HTTP/1.1 204 No Content\r\n\r\n", &Method::GET).1, PayloadSize::Empty);
        assert_eq!(decode("HTTP/1.1 304 Not Modified\r\nContent-Length: 9\r\n\r\n", &Method::GET).1, PayloadSize::Empty);
        assert_eq!(decode("HTTP/1.0 200 OK\r\n\r\n", &Method::GET).1, PayloadSize::UntilClose);
        assert_eq!(decode("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n", &Method::GET).1, PayloadSize::Chunked);
    }

    #[test]
    fn status_without_reason() {
        let (head, size) = decode("HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n", &Method::GET);
        assert_eq!(head.status(), StatusCode::OK);
        assert!(size.is_empty());
    }

    #[test]
    fn garbage_status_line() {
        let err = ResponseHeadDecoder::default().decode_for(&mut BytesMut::from("SMTP ready and waiting\r\n\r\n"), &Method::GET).unwrap_err();
        assert!(matches!(err, ParseError::InvalidHeader { .. }));
    }
}
