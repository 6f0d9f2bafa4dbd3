//! A small HTTP/1.1 server transport built on tokio codecs.
//!
//! It is made for handlers that keep a request open for a long time and stream large bodies
//! through: the request body is served lazily and may be read from another task, while response
//! bodies are streamed frame by frame with framing chosen from their size hint.
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use bytes::Bytes;
//! use tokio::net::TcpListener;
//! use httppipe_http::connection::HttpConnection;
//! use httppipe_http::handler::make_handler;
//! use httppipe_http::protocol::body::ReqBody;
//!
//! async fn hello(_request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     Ok(Response::new(Full::new(Bytes::from_static(b"hello\n"))))
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let handler = Arc::new(make_handler(hello));
//!
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             let _ = HttpConnection::new(reader, writer).process(handler).await;
//!         });
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`connection`]: the per-socket request loop
//! - [`handler`]: the [`handler::Handler`] trait and [`handler::make_handler`]
//! - [`protocol`]: message heads, body, and error types
//! - [`codec`]: request decoding and response encoding
//!
//! # Limitations
//!
//! - HTTP/1.1 only, no TLS
//! - request heads are limited to 8 KiB and 64 header fields

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
