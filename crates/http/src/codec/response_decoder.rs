//! Client side response decoder.
//!
//! Responses arrive in request order, so the decoder keeps the methods of the
//! requests still waiting for an answer; the method decides whether the
//! response can carry a body at all.

use std::collections::VecDeque;

use bytes::BytesMut;
use http::{Method, StatusCode};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::codec::config::CodecConfig;
use crate::codec::header::ResponseHeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead};

pub struct ResponseDecoder {
    head_decoder: ResponseHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
    pending: VecDeque<Method>,
    max_chunk_size: usize,
}

impl ResponseDecoder {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            head_decoder: ResponseHeadDecoder::new(config),
            payload_decoder: None,
            pending: VecDeque::new(),
            max_chunk_size: config.max_chunk_size,
        }
    }

    /// Registers a request that was sent and awaits its response.
    pub fn expect_response_to(&mut self, method: Method) {
        self.pending.push_back(method);
    }

    pub fn pending_responses(&self) -> usize {
        self.pending.len()
    }

    pub fn in_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }

    fn payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(ResponseHead, PayloadSize)>> {
        if item.as_ref().is_some_and(PayloadItem::is_eof) {
            self.payload_decoder.take();
        }
        item.map(Message::Payload)
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            return Ok(self.payload(item));
        }

        loop {
            if src.is_empty() {
                return Ok(None);
            }
            let Some(method) = self.pending.front() else {
                return Err(ParseError::invalid_header("response received without an outstanding request"));
            };

            let Some((head, payload_size)) = self.head_decoder.decode_for(src, method)? else {
                return Ok(None);
            };

            // interim responses are dropped, the final one follows on the same request
            if head.status().is_informational() && head.status() != StatusCode::SWITCHING_PROTOCOLS {
                trace!(status = head.status().as_u16(), "skipping interim response");
                continue;
            }

            self.pending.pop_front();
            self.payload_decoder = Some(PayloadDecoder::from_size(payload_size, self.max_chunk_size));
            return Ok(Some(Message::Header((head, payload_size))));
        }
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
