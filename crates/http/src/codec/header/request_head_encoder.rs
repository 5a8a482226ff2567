//! Serializes client request heads in origin form.

use std::io::{self, ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, Method, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::writer::BytesWriter;
use crate::protocol::{PayloadSize, RequestHead, SendError};

const INIT_HEADER_SIZE: usize = 1024;

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
const ZERO: HeaderValue = HeaderValue::from_static("0");

#[derive(Debug, Default)]
pub struct RequestHeadEncoder;

impl Encoder<(RequestHead, PayloadSize)> for RequestHeadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (RequestHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let target = head.uri().path_and_query().map_or("/", |pq| pq.as_str());
        write!(BytesWriter(dst), "{} {target} {version}\r\n", head.method())?;

        let method = head.method().clone();
        let headers = head.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, CHUNKED);
            }
            PayloadSize::Empty | PayloadSize::UntilClose => {
                headers.remove(header::TRANSFER_ENCODING);
                if expects_body(&method) {
                    headers.insert(header::CONTENT_LENGTH, ZERO);
                } else {
                    headers.remove(header::CONTENT_LENGTH);
                }
            }
        }

        for (name, value) in head.headers() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn expects_body(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::PATCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn encode(head: RequestHead, size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        RequestHeadEncoder.encode((head, size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn origin_form_target() {
        let head = Request::get("http://example.com/search?q=rust").header(header::HOST, "example.com").body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Empty), "GET /search?q=rust HTTP/1.1\r\nhost: example.com\r\n\r\n");
    }

    #[test]
    fn empty_post_announces_zero_length() {
        let head = Request::post("/submit").body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Empty), "POST /submit HTTP/1.1\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn chunked_upload() {
        let head = Request::put("/blob").body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Chunked), "PUT /blob HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n");
    }
}
