//! Decoder for response payloads that end when the server closes the connection.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntilCloseDecoder {
    max_chunk_size: usize,
    finished: bool,
}

impl UntilCloseDecoder {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size: max_chunk_size.max(1), finished: false }
    }
}

impl Decoder for UntilCloseDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.finished {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let len = src.len().min(self.max_chunk_size);
        Ok(Some(PayloadItem::Chunk(src.split_to(len).freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                self.finished = true;
                Ok(Some(PayloadItem::Eof))
            }
        }
    }
}
