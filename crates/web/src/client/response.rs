use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use ripple_http::channel::Inbound;
use ripple_http::pipeline::{Decompress, Encoding};
use ripple_http::protocol::{ChannelError, ResponseHead};
use tracing::debug;

use crate::error::ClientError;

/// The body of a response, streamed from the connection as it is polled.
///
/// When the client accepts compression and the server used it, chunks come
/// out already decompressed.
pub struct ResponseContent {
    inner: Content,
}

enum Content {
    Plain(Inbound<Bytes>),
    Decoded(Decompress<Inbound<Bytes>>),
}

impl ResponseContent {
    /// Wraps `body` according to the `content-encoding` of `head`.
    ///
    /// A decoded body no longer matches the announced length or encoding, so
    /// both headers are removed from `head`.
    pub(crate) fn new(head: &mut ResponseHead, body: Inbound<Bytes>, decode: bool) -> Result<Self, ClientError> {
        let encoding = if decode { Encoding::of_response(head.headers()) } else { None };
        let Some(encoding) = encoding else {
            return Ok(Self { inner: Content::Plain(body) });
        };

        debug!(encoding = encoding.as_str(), "decoding response body");
        let decoded = Decompress::new(body, encoding).map_err(ChannelError::from)?;
        head.headers_mut().remove(CONTENT_ENCODING);
        head.headers_mut().remove(CONTENT_LENGTH);
        Ok(Self { inner: Content::Decoded(decoded) })
    }

    /// Collects the remaining body into one buffer.
    pub async fn aggregate(mut self) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.inner, Content::Decoded(_))
    }
}

impl Stream for ResponseContent {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = match &mut self.get_mut().inner {
            Content::Plain(body) => body.poll_next_unpin(cx),
            Content::Decoded(body) => body.poll_next_unpin(cx),
        };
        polled.map(|item| item.map(|chunk| chunk.map_err(ClientError::from)))
    }
}

impl fmt::Debug for ResponseContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Content::Plain(body) => f.debug_tuple("ResponseContent").field(body).finish(),
            Content::Decoded(body) => f.debug_tuple("ResponseContent").field(body).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use http::{HeaderValue, Response};
    use ripple_http::channel::inbound;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    async fn feed(chunks: Vec<Bytes>) -> Inbound<Bytes> {
        let (mut sender, body) = inbound();
        tokio::spawn(async move {
            for chunk in chunks {
                let Some(demand) = sender.demand().await else { return };
                demand.deliver(chunk);
            }
            if let Some(demand) = sender.demand().await {
                demand.complete();
            }
        });
        body
    }

    fn gzip_head(length: usize) -> ResponseHead {
        let mut head = Response::new(());
        head.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        head.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(length));
        head
    }

    #[tokio::test]
    async fn gzip_body_is_decoded_and_headers_dropped() {
        let compressed = gzip(b"hello compressed world");
        let mut head = gzip_head(compressed.len());
        let (first, second) = compressed.split_at(compressed.len() / 2);
        let body = feed(vec![Bytes::copy_from_slice(first), Bytes::copy_from_slice(second)]).await;

        let content = ResponseContent::new(&mut head, body, true).unwrap();
        assert!(content.is_decoded());
        assert!(!head.headers().contains_key(CONTENT_ENCODING));
        assert!(!head.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(content.aggregate().await.unwrap(), "hello compressed world");
    }

    #[tokio::test]
    async fn without_decoding_the_body_is_untouched() {
        let compressed = gzip(b"raw");
        let mut head = gzip_head(compressed.len());
        let body = feed(vec![compressed.clone()]).await;

        let content = ResponseContent::new(&mut head, body, false).unwrap();
        assert!(!content.is_decoded());
        assert!(head.headers().contains_key(CONTENT_ENCODING));
        assert_eq!(content.aggregate().await.unwrap(), compressed);
    }

    #[tokio::test]
    async fn identity_responses_pass_through() {
        let mut head = Response::new(());
        let body = feed(vec![Bytes::from_static(b"plain")]).await;

        let content = ResponseContent::new(&mut head, body, true).unwrap();
        assert!(!content.is_decoded());
        assert_eq!(content.aggregate().await.unwrap(), "plain");
    }
}
