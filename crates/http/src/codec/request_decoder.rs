use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes a stream of requests: one [`Message::Header`] followed by payload items ending with
/// [`PayloadItem::Eof`], then the next request.
///
/// `payload_decoder` is `Some` exactly while a body is being decoded.
#[derive(Default)]
pub struct RequestDecoder {
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            if let Some(PayloadItem::Eof) = item {
                self.payload_decoder = None;
            }
            return Ok(item.map(Message::Payload));
        }

        let message = HeaderDecoder.decode(src)?.map(|(header, payload_size)| {
            self.payload_decoder = Some(payload_size.into());
            Message::Header((header, payload_size))
        });
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_body_then_next_request() {
        let mut buf = BytesMut::from("PUT /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /x HTTP/1.1\r\n\r\n");
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((header, size))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected request head");
        };
        assert_eq!(header.uri().path(), "/x");
        assert_eq!(size, PayloadSize::Length(5));

        let Some(Message::Payload(PayloadItem::Chunk(bytes))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected body chunk");
        };
        assert_eq!(&bytes[..], b"hello");
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));

        let Some(Message::Header((header, size))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected second request head");
        };
        assert_eq!(header.method(), &http::Method::GET);
        assert!(size.is_empty());
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
