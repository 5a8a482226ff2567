//! Decoder for `content-length` framed payloads.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// bytes still owed by the peer
    length: u64,
    max_chunk_size: usize,
}

impl LengthDecoder {
    pub fn new(length: u64, max_chunk_size: usize) -> Self {
        Self { length, max_chunk_size: max_chunk_size.max(1) }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let owed = usize::try_from(self.length).unwrap_or(usize::MAX);
        let len = owed.min(src.len()).min(self.max_chunk_size);
        let bytes = src.split_to(len).freeze();

        self.length -= len as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => Err(ParseError::invalid_body(format!("connection closed with {} payload bytes outstanding", self.length))),
        }
    }
}
