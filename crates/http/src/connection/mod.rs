//! Connection handling: one [`HttpConnection`] per accepted socket, processing requests in order
//! with keep-alive and `Expect: 100-continue` support.
//!
//! Each request carries a [`CancellationToken`] in its extensions. It is cancelled when the
//! client closes the connection or breaks the request body while the request is handled, and in
//! any case once the request is finished. A client that only shuts down its sending half counts
//! as gone.

mod http_connection;

use http::Request;
use tokio_util::sync::CancellationToken;

pub use http_connection::HttpConnection;

/// The cancellation token of a request being processed by [`HttpConnection`].
///
/// Requests built elsewhere get a fresh token that is never cancelled.
pub fn request_cancellation<T>(request: &Request<T>) -> CancellationToken {
    request.extensions().get::<CancellationToken>().cloned().unwrap_or_default()
}
