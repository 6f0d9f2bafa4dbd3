//! Request body streaming.
//!
//! The connection owns the socket, so the body a handler reads cannot borrow it: a handler may
//! hand the body to another connection's task. [`ReqBody`] therefore talks to the connection
//! through two bounded channels. It asks for the next item over a signal channel, and the
//! connection-side sender answers with one payload item over a data channel.
//!
//! The sender keeps reading the connection while the handler runs, a bounded amount ahead of the
//! reader. That is how a request learns its client went away before anyone touched the body.
//! Whatever the handler leaves unread is drained before the next request on the connection.

mod channel;

pub use channel::ReqBody;
pub(crate) use channel::body_channel;
