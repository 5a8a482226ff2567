//! Server side request decoder.
//!
//! Alternates between the head decoder and a payload decoder: after a head is
//! emitted, payload items follow until [`PayloadItem::Eof`], then the next head
//! may be parsed from the same buffer.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::config::CodecConfig;
use crate::codec::header::RequestHeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

pub struct RequestDecoder {
    head_decoder: RequestHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
    max_chunk_size: usize,
}

impl RequestDecoder {
    pub fn new(config: CodecConfig) -> Self {
        Self { head_decoder: RequestHeadDecoder::new(config), payload_decoder: None, max_chunk_size: config.max_chunk_size }
    }

    /// Whether a request payload is still being read.
    pub fn in_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }

    fn payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(RequestHead, PayloadSize)>> {
        if item.as_ref().is_some_and(PayloadItem::is_eof) {
            self.payload_decoder.take();
        }
        item.map(Message::Payload)
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            return Ok(self.payload(item));
        }

        let message = self.head_decoder.decode(src)?.map(|(head, payload_size)| {
            self.payload_decoder = Some(PayloadDecoder::from_size(payload_size, self.max_chunk_size));
            Message::Header((head, payload_size))
        });
        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode_eof(src)?;
            return Ok(self.payload(item));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(ParseError::invalid_header(format!("connection closed with {} bytes of an incomplete head", src.len()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use indoc::indoc;

    #[test]
    fn pipelined_requests() {
        let str = indoc! {r##"
        POST /echo HTTP/1.1
        Content-Length: 5

        helloGET /next HTTP/1.1
        Host: example.com

        "##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::default();

        let Some(Message::Header((head, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expected a head") };
        assert_eq!(head.uri().path(), "/echo");
        assert_eq!(size, PayloadSize::Length(5));
        assert!(decoder.in_payload());

        let Some(Message::Payload(PayloadItem::Chunk(body))) = decoder.decode(&mut buf).unwrap() else { panic!("expected a chunk") };
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
        assert!(!decoder.in_payload());

        let Some(Message::Header((head, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expected a head") };
        assert_eq!(head.uri().path(), "/next");
        assert!(size.is_empty());
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn closed_inside_a_head() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost");
        assert!(RequestDecoder::default().decode_eof(&mut buf).is_err());
        assert!(RequestDecoder::default().decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }
}
