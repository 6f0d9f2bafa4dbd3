//! `tokio_util` codecs for HTTP/1.1: [`RequestDecoder`] turns bytes into request messages and
//! [`ResponseEncoder`] turns response messages into bytes. Both are state machines that switch
//! between a head and the body framed behind it.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
