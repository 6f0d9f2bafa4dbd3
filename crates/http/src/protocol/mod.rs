//! Protocol types shared by the codec, the connection loop and handlers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`] describe what flows through the codecs
//! - [`RequestHeader`] and [`ResponseHead`] are the message heads
//! - [`body::ReqBody`] is the request body handed to handlers
//! - [`HttpError`], [`ParseError`] and [`SendError`] are the error types

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;

/// Response head before the body is attached.
pub type ResponseHead = http::Response<()>;
