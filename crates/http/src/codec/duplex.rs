//! Full-duplex codecs for one connection: the server reads requests and
//! writes responses, the client does the opposite.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::config::CodecConfig;
use crate::codec::{RequestDecoder, RequestEncoder, ResponseDecoder, ResponseEncoder};
use crate::protocol::{Message, ParseError, PayloadSize, RequestHead, ResponseHead, SendError};

pub struct ServerCodec {
    decoder: RequestDecoder,
    encoder: ResponseEncoder,
}

impl ServerCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { decoder: RequestDecoder::new(config), encoder: ResponseEncoder::new() }
    }

    pub fn in_payload(&self) -> bool {
        self.decoder.in_payload()
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for ServerCodec {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ServerCodec {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

pub struct ClientCodec {
    decoder: ResponseDecoder,
    encoder: RequestEncoder,
}

impl ClientCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { decoder: ResponseDecoder::new(config), encoder: RequestEncoder::new() }
    }

    pub fn pending_responses(&self) -> usize {
        self.decoder.pending_responses()
    }

    pub fn in_payload(&self) -> bool {
        self.decoder.in_payload()
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for ClientCodec {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl<D: Buf> Encoder<Message<(RequestHead, PayloadSize), D>> for ClientCodec {
    type Error = SendError;

    fn encode(&mut self, item: Message<(RequestHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let method = match &item {
            Message::Header((head, _)) => Some(head.method().clone()),
            Message::Payload(_) => None,
        };
        self.encoder.encode(item, dst)?;
        if let Some(method) = method {
            self.decoder.expect_response_to(method);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadItem;
    use bytes::Bytes;
    use http::{Request, StatusCode};

    #[test]
    fn client_round_trip_on_one_buffer() {
        let mut codec = ClientCodec::default();
        let mut out = BytesMut::new();
        let head = Request::head("/resource").body(()).unwrap();

        codec.encode(Message::<_, Bytes>::Header((head, PayloadSize::Empty)), &mut out).unwrap();
        assert_eq!(codec.pending_responses(), 1);
        assert_eq!(&out[..], b"HEAD /resource HTTP/1.1\r\n\r\n");

        let mut inbound = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\n");
        let Some(Message::Header((head, size))) = codec.decode(&mut inbound).unwrap() else { panic!("expected a head") };
        assert_eq!(head.status(), StatusCode::OK);
        assert!(size.is_empty());
        assert!(matches!(codec.decode(&mut inbound).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
    }

    #[test]
    fn server_codec_reads_requests() {
        let mut codec = ServerCodec::default();
        let mut inbound = BytesMut::from("GET /ping HTTP/1.1\r\n\r\n");

        assert!(matches!(codec.decode(&mut inbound).unwrap(), Some(Message::Header(_))));
        assert!(codec.in_payload());
        assert!(matches!(codec.decode(&mut inbound).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
    }
}
