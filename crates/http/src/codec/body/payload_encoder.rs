use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Frames response body items according to the [`PayloadSize`] announced in the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
    eof: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// `Content-Length` body with this many bytes still owed
    Length(u64),
    Chunked,
    NoBody,
}

impl PayloadEncoder {
    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        let kind = match payload_size {
            PayloadSize::Length(size) => Kind::Length(size),
            PayloadSize::Chunked => Kind::Chunked,
            PayloadSize::Empty => Kind::NoBody,
        };
        Self { kind, eof: false }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            warn!("encode payload_item after the body finished");
            return Ok(());
        }

        match (&mut self.kind, item) {
            (_, PayloadItem::Chunk(bytes)) if !bytes.has_remaining() => Ok(()),

            (Kind::Length(remaining), PayloadItem::Chunk(mut bytes)) => {
                let len = bytes.remaining() as u64;
                if len > *remaining {
                    return Err(SendError::invalid_body(format!("body exceeds content-length by {} bytes", len - *remaining)));
                }
                *remaining -= len;
                dst.reserve(bytes.remaining());
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.put_slice(chunk);
                    bytes.advance(n);
                }
                Ok(())
            }
            (Kind::Length(remaining), PayloadItem::Eof) => {
                self.eof = true;
                if *remaining > 0 {
                    return Err(SendError::invalid_body(format!("body ended {remaining} bytes short of content-length")));
                }
                Ok(())
            }

            (Kind::Chunked, PayloadItem::Chunk(mut bytes)) => {
                write!(BytesWriter(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.put_slice(chunk);
                    bytes.advance(n);
                }
                dst.put_slice(b"\r\n");
                Ok(())
            }
            (Kind::Chunked, PayloadItem::Eof) => {
                self.eof = true;
                dst.put_slice(b"0\r\n\r\n");
                Ok(())
            }

            (Kind::NoBody, PayloadItem::Chunk(_)) => Err(SendError::invalid_body("body sent for a response without body")),
            (Kind::NoBody, PayloadItem::Eof) => {
                self.eof = true;
                Ok(())
            }
        }
    }
}

pub(crate) struct BytesWriter<'a>(pub(crate) &'a mut BytesMut);

impl Write for BytesWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(encoder: &mut PayloadEncoder, item: PayloadItem, dst: &mut BytesMut) -> Result<(), SendError> {
        Encoder::<PayloadItem>::encode(encoder, item, dst)
    }

    #[test]
    fn chunked_framing() {
        let mut encoder = PayloadEncoder::from(PayloadSize::Chunked);
        let mut dst = BytesMut::new();

        encode(&mut encoder, PayloadItem::Chunk(Bytes::from_static(b"hello world!")), &mut dst).unwrap();
        encode(&mut encoder, PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encode(&mut encoder, PayloadItem::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"C\r\nhello world!\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
    }

    #[test]
    fn length_framing() {
        let mut encoder = PayloadEncoder::from(PayloadSize::Length(5));
        let mut dst = BytesMut::new();

        encode(&mut encoder, PayloadItem::Chunk(Bytes::from_static(b"hel")), &mut dst).unwrap();
        encode(&mut encoder, PayloadItem::Chunk(Bytes::from_static(b"lo")), &mut dst).unwrap();
        assert!(!encoder.is_finish());
        encode(&mut encoder, PayloadItem::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"hello");
        assert!(encoder.is_finish());
    }

    #[test]
    fn length_mismatch() {
        let mut dst = BytesMut::new();

        let mut encoder = PayloadEncoder::from(PayloadSize::Length(2));
        assert!(encode(&mut encoder, PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).is_err());

        let mut encoder = PayloadEncoder::from(PayloadSize::Length(4));
        encode(&mut encoder, PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).unwrap();
        assert!(encode(&mut encoder, PayloadItem::Eof, &mut dst).is_err());
    }
}
