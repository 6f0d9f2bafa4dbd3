//! Body framing: `Content-Length` and `Transfer-Encoding: chunked` in both directions.

mod chunked_decoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
pub(crate) use payload_encoder::BytesWriter;
