//! Response compression for servers and response decompression for clients.
//!
//! The server side picks an encoding from the request's `accept-encoding`
//! (zstd, br, gzip, deflate in that order of preference) and compresses the
//! response when the predicate says so or the body reaches the size
//! threshold. A body of unknown size is buffered until the threshold is
//! reached or the body ends, whichever comes first.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use brotli::{CompressorWriter, DecompressorWriter};
use bytes::{Bytes, BytesMut};
use flate2::Compression as Level;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use futures::{Stream, StreamExt};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tracing::{debug, trace, warn};
use zstd::stream::write::{Decoder as ZstdDecoder, Encoder as ZstdEncoder};

use crate::protocol::{BoxBody, BoxError, ChannelError, RequestHead, ResponseHead};

/// Decides per exchange whether a response gets compressed.
pub type CompressionPredicate = Arc<dyn Fn(&RequestHead, &ResponseHead) -> bool + Send + Sync>;

/// What the compression stage of a pipeline does.
#[derive(Clone)]
pub enum Compression {
    /// server: compress responses according to the policy
    Encode(CompressionPolicy),
    /// client: decompress responses, advertising the supported encodings
    Decode,
}

impl fmt::Debug for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Encode(policy) => f.debug_tuple("Encode").field(policy).finish(),
            Compression::Decode => f.write_str("Decode"),
        }
    }
}

/// `accept-encoding` sent by clients that decode responses.
pub const ACCEPTED_ENCODINGS: HeaderValue = HeaderValue::from_static("gzip");

#[derive(Clone)]
pub struct CompressionPolicy {
    min_size: Option<usize>,
    predicate: Option<CompressionPredicate>,
}

impl CompressionPolicy {
    /// `None` when neither a threshold nor a predicate is configured, which
    /// means compression is off.
    pub fn new(min_size: Option<usize>, predicate: Option<CompressionPredicate>) -> Option<Self> {
        if min_size.is_none() && predicate.is_none() {
            return None;
        }
        Some(Self { min_size, predicate })
    }

    pub fn min_size(&self) -> Option<usize> {
        self.min_size
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// Compresses `response` if the request accepts it and the policy agrees.
    ///
    /// May read the start of the body to learn whether it reaches the
    /// threshold; those chunks are replayed in front of the rest.
    pub async fn prepare_response(&self, request: &RequestHead, response: Response<BoxBody>) -> Response<BoxBody> {
        if !is_compressible(request, &response) {
            return response;
        }
        let Some(encoding) = request.headers().get(ACCEPT_ENCODING).and_then(|v| v.to_str().ok()).and_then(Encoding::negotiate)
        else {
            return response;
        };

        let (parts, body) = response.into_parts();
        let head = Response::from_parts(parts, ());
        if let Some(predicate) = &self.predicate {
            if predicate(request, &head) {
                return encode(head, body, encoding);
            }
        }

        let Some(min_size) = self.min_size else {
            return head.map(|()| body);
        };

        match body.size_hint().exact() {
            Some(size) if size >= min_size as u64 => encode(head, body, encoding),
            Some(_) => head.map(|()| body),
            None => {
                let (body, size) = Prefixed::read_up_to(body, min_size).await;
                match size {
                    Some(size) if size < min_size => {
                        trace!(size, min_size, "response below compression threshold");
                        head.map(|()| body.boxed_unsync())
                    }
                    _ => encode(head, body.boxed_unsync(), encoding),
                }
            }
        }
    }
}

impl fmt::Debug for CompressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionPolicy")
            .field("min_size", &self.min_size)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

fn is_compressible(request: &RequestHead, response: &Response<BoxBody>) -> bool {
    let status = response.status();
    if request.method() == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return false;
    }
    !response.headers().contains_key(CONTENT_ENCODING) && !response.body().is_end_stream()
}

fn encode(mut head: ResponseHead, body: BoxBody, encoding: Encoding) -> Response<BoxBody> {
    let encoder = match Encoder::new(encoding) {
        Ok(encoder) => encoder,
        Err(e) => {
            warn!(encoding = encoding.as_str(), cause = %e, "can't create encoder, sending identity");
            return head.map(|()| body);
        }
    };
    debug!(encoding = encoding.as_str(), "compressing response");

    let headers = head.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
    headers.append(VARY, HeaderValue::from_static("accept-encoding"));
    head.map(|()| EncodedBody { inner: body, encoder: Some(encoder) }.boxed_unsync())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
    Zstd,
    Br,
}

impl Encoding {
    const PREFERENCE: [Encoding; 4] = [Encoding::Zstd, Encoding::Br, Encoding::Gzip, Encoding::Deflate];

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Zstd => "zstd",
            Encoding::Br => "br",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            n if n.eq_ignore_ascii_case("gzip") || n.eq_ignore_ascii_case("x-gzip") => Some(Encoding::Gzip),
            n if n.eq_ignore_ascii_case("deflate") => Some(Encoding::Deflate),
            n if n.eq_ignore_ascii_case("zstd") => Some(Encoding::Zstd),
            n if n.eq_ignore_ascii_case("br") => Some(Encoding::Br),
            _ => None,
        }
    }

    /// Picks the preferred encoding out of an `accept-encoding` value,
    /// skipping entries with `q=0`.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        let mut wildcard = false;
        let accepted: Vec<Encoding> = accept_encoding
            .split(',')
            .filter_map(|entry| {
                let mut params = entry.split(';');
                let name = params.next()?.trim();
                let refused = params.any(|p| p.trim().strip_prefix("q=").and_then(|q| q.trim().parse::<f32>().ok()) == Some(0.0));
                if refused {
                    return None;
                }
                if name == "*" {
                    wildcard = true;
                }
                Encoding::from_name(name)
            })
            .collect();

        Self::PREFERENCE.into_iter().find(|e| accepted.contains(e)).or(wildcard.then_some(Encoding::Gzip))
    }

    /// The encoding a response body was sent with, if it's one this crate decodes.
    pub fn of_response(headers: &HeaderMap) -> Option<Self> {
        headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()).and_then(Encoding::from_name)
    }
}

struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Zstd(ZstdEncoder<'static, Writer>),
    Br(Box<CompressorWriter<Writer>>),
}

impl Encoder {
    fn new(encoding: Encoding) -> io::Result<Self> {
        Ok(match encoding {
            Encoding::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), Level::default())),
            Encoding::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), Level::default())),
            Encoding::Zstd => Self::Zstd(ZstdEncoder::new(Writer::new(), 6)?),
            // 32 KiB buffer, quality 3, lgwin 22
            Encoding::Br => Self::Br(Box::new(CompressorWriter::new(Writer::new(), 32 * 1024, 3, 22))),
        })
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        }
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    fn finish(self) -> io::Result<Bytes> {
        let writer = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Br(encoder) => encoder.into_inner(),
        };
        Ok(writer.buf.freeze())
    }
}

struct EncodedBody {
    inner: BoxBody,
    encoder: Option<Encoder>,
}

impl Body for EncodedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    // trailers can't follow a compressed identity body, they are dropped
                    let Ok(data) = frame.into_data() else { continue };
                    if let Err(e) = encoder.write(&data) {
                        this.encoder = None;
                        return Poll::Ready(Some(Err(e.into())));
                    }
                    let bytes = encoder.take();
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(bytes))));
                    }
                }
                Some(Err(e)) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let finished = this.encoder.take().map(Encoder::finish);
                    return match finished {
                        Some(Ok(bytes)) if !bytes.is_empty() => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                        Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                        _ => Poll::Ready(None),
                    };
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }
}

/// A body whose first chunks were already read; they are replayed first.
struct Prefixed {
    buffered: VecDeque<Bytes>,
    failure: Option<BoxError>,
    rest: Option<BoxBody>,
}

impl Prefixed {
    /// Reads until `limit` bytes are buffered or the body ends. The size is
    /// returned only when the whole body was read.
    async fn read_up_to(mut body: BoxBody, limit: usize) -> (Self, Option<usize>) {
        let mut buffered = VecDeque::new();
        let mut size = 0;
        while size < limit {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        size += data.len();
                        buffered.push_back(data);
                    }
                }
                Some(Err(e)) => return (Self { buffered, failure: Some(e), rest: None }, None),
                None => return (Self { buffered, failure: None, rest: None }, Some(size)),
            }
        }
        (Self { buffered, failure: None, rest: Some(body) }, None)
    }
}

impl Body for Prefixed {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(bytes) = this.buffered.pop_front() {
            return Poll::Ready(Some(Ok(Frame::data(bytes))));
        }
        if let Some(e) = this.failure.take() {
            return Poll::Ready(Some(Err(e)));
        }
        match &mut this.rest {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.buffered.is_empty() && self.failure.is_none() && self.rest.as_ref().is_none_or(Body::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        let buffered: u64 = self.buffered.iter().map(|b| b.len() as u64).sum();
        match &self.rest {
            None => SizeHint::with_exact(buffered),
            Some(rest) => {
                let rest = rest.size_hint();
                let mut hint = SizeHint::new();
                hint.set_lower(buffered + rest.lower());
                if let Some(upper) = rest.upper() {
                    hint.set_upper(buffered + upper);
                }
                hint
            }
        }
    }
}

enum ContentDecoder {
    Gzip(GzDecoder<Writer>),
    Deflate(ZlibDecoder<Writer>),
    Zstd(ZstdDecoder<'static, Writer>),
    Br(Box<DecompressorWriter<Writer>>),
}

impl ContentDecoder {
    fn new(encoding: Encoding) -> io::Result<Self> {
        Ok(match encoding {
            Encoding::Gzip => Self::Gzip(GzDecoder::new(Writer::new())),
            Encoding::Deflate => Self::Deflate(ZlibDecoder::new(Writer::new())),
            Encoding::Zstd => Self::Zstd(ZstdDecoder::new(Writer::new())?),
            Encoding::Br => Self::Br(Box::new(DecompressorWriter::new(Writer::new(), 4096))),
        })
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(decoder) => decoder.write_all(data),
            Self::Deflate(decoder) => decoder.write_all(data),
            Self::Zstd(decoder) => decoder.write_all(data),
            Self::Br(decoder) => decoder.write_all(data),
        }
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(decoder) => decoder.get_mut().take(),
            Self::Deflate(decoder) => decoder.get_mut().take(),
            Self::Zstd(decoder) => decoder.get_mut().take(),
            Self::Br(decoder) => decoder.get_mut().take(),
        }
    }

    fn finish(self) -> io::Result<Bytes> {
        let writer = match self {
            Self::Gzip(decoder) => decoder.finish()?,
            Self::Deflate(decoder) => decoder.finish()?,
            Self::Zstd(mut decoder) => {
                decoder.flush()?;
                decoder.into_inner()
            }
            Self::Br(decoder) => {
                decoder.into_inner().map_err(|_unfinished| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated brotli stream"))?
            }
        };
        Ok(writer.buf.freeze())
    }
}

/// Decompresses a stream of response chunks.
pub struct Decompress<S> {
    inner: S,
    decoder: Option<ContentDecoder>,
}

impl<S> Decompress<S> {
    pub fn new(inner: S, encoding: Encoding) -> io::Result<Self> {
        Ok(Self { inner, decoder: Some(ContentDecoder::new(encoding)?) })
    }
}

impl<S> Stream for Decompress<S>
where
    S: Stream<Item = Result<Bytes, ChannelError>> + Unpin,
{
    type Item = Result<Bytes, ChannelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => {
                    if let Err(e) = decoder.write(&bytes) {
                        this.decoder = None;
                        return Poll::Ready(Some(Err(e.into())));
                    }
                    let decoded = decoder.take();
                    if !decoded.is_empty() {
                        return Poll::Ready(Some(Ok(decoded)));
                    }
                }
                Some(Err(e)) => {
                    this.decoder = None;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let finished = this.decoder.take().map(ContentDecoder::finish);
                    return match finished {
                        Some(Ok(bytes)) if !bytes.is_empty() => Poll::Ready(Some(Ok(bytes))),
                        Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                        _ => Poll::Ready(None),
                    };
                }
            }
        }
    }
}

impl<S> fmt::Debug for Decompress<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decompress").field("finished", &self.decoder.is_none()).finish()
    }
}
