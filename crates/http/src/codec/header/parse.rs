//! Pieces shared by the request and response head decoders.
//!
//! Both decoders parse with `httparse` over the read buffer, remember where each
//! header name and value sits, then split the head off the buffer once and
//! slice the values out of it without copying.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::codec::config::MAX_HEADER_NUM;
use crate::ensure;
use crate::protocol::ParseError;

/// Byte ranges of one header's name and value within the head buffer.
#[derive(Clone, Copy)]
pub(crate) struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

pub(crate) const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_NUM] = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];

impl HeaderIndex {
    pub(crate) fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Appends the recorded headers, slicing names and values out of `head`.
pub(crate) fn fill_headers(headers: &mut HeaderMap, head: &Bytes, indices: &[HeaderIndex], validate: bool) -> Result<(), ParseError> {
    headers.reserve(indices.len());
    for index in indices {
        let name = HeaderName::from_bytes(&head[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
        let value = head.slice(index.value.0..index.value.1);
        let value = if validate {
            HeaderValue::from_maybe_shared(value).map_err(ParseError::invalid_header)?
        } else {
            // SAFETY: httparse only accepts header values made of HTAB, SP,
            // visible ASCII and obs-text, which is what HeaderValue allows.
            unsafe { HeaderValue::from_maybe_shared_unchecked(value) }
        };
        headers.append(name, value);
    }
    Ok(())
}

/// Length of the initial line including its line break, once it is complete.
///
/// Fails as soon as more than `max` bytes arrived without a line break.
pub(crate) fn initial_line_len(src: &[u8], max: usize) -> Result<Option<usize>, ParseError> {
    let window = &src[..src.len().min(max.saturating_add(2))];
    match window.iter().position(|b| *b == b'\n') {
        Some(lf) => {
            let content = if lf > 0 && window[lf - 1] == b'\r' { lf - 1 } else { lf };
            ensure!(content <= max, ParseError::too_long_initial_line(content, max));
            Ok(Some(lf + 1))
        }
        None if src.len() > max.saturating_add(1) => Err(ParseError::too_long_initial_line(src.len(), max)),
        None => Ok(None),
    }
}

pub(crate) fn parse_version(version: Option<u8>) -> Result<Version, ParseError> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        // HTTP/2 and HTTP/3 are not spoken on this codec
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

/// Whether `chunked` is the final transfer coding.
pub(crate) fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    header_value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(CHUNKED))
}

pub(crate) fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ParseError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
    let length = text.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {text} is not u64")))?;
    Ok(Some(length))
}

pub(crate) fn transfer_encoding(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(TRANSFER_ENCODING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_is_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(headers.get(TRANSFER_ENCODING)));

        headers.insert(TRANSFER_ENCODING, "gzip, chunked".parse().unwrap());
        assert!(is_chunked(headers.get(TRANSFER_ENCODING)));

        headers.insert(TRANSFER_ENCODING, "chunked, gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(TRANSFER_ENCODING)));

        headers.insert(TRANSFER_ENCODING, "Chunked".parse().unwrap());
        assert!(is_chunked(headers.get(TRANSFER_ENCODING)));
    }

    #[test]
    fn initial_line_limits() {
        assert_eq!(initial_line_len(b"GET / HTTP/1.1\r\nHost", 14).unwrap(), Some(16));
        assert_eq!(initial_line_len(b"GET / HTTP/1.1", 14).unwrap(), None);
        assert!(matches!(initial_line_len(b"GET / HTTP/1.1\r\n", 10), Err(ParseError::TooLongInitialLine { .. })));
        assert!(matches!(initial_line_len(b"GET /aaaaaaaaaaaaaaaa", 10), Err(ParseError::TooLongInitialLine { .. })));
    }

    #[test]
    fn content_length_must_be_numeric() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers).unwrap(), None);

        headers.insert(CONTENT_LENGTH, " 12 ".parse().unwrap());
        assert_eq!(content_length(&headers).unwrap(), Some(12));

        headers.insert(CONTENT_LENGTH, "twelve".parse().unwrap());
        assert!(matches!(content_length(&headers), Err(ParseError::InvalidContentLength { .. })));
    }
}
