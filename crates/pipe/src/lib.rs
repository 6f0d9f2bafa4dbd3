//! A named, one-shot pipe over HTTP.
//!
//! A producer `PUT`s a body on a key (the request path and query) and a consumer `GET`s the same
//! key. The two requests are paired and the producer's body streams straight into the
//! consumer's response, nothing is buffered beyond a chunk in flight. The producer gets its
//! `200` only after the consumer copied the whole body.
//!
//! ```text
//! $ curl -T big.iso http://localhost:8080/iso      # waits for a reader
//! $ curl http://localhost:8080/iso > copy.iso      # pairs, streams, then both return
//! ```
//!
//! - [`Rendezvous`] pairs producers and consumers per key over a [`Registry`] of [`Slot`]s
//! - [`PipeHandler`] maps HTTP methods to roles and outcomes to status codes
//! - [`Server`] accepts connections and runs them on the `httppipe-http` transport
//!
//! | outcome                              | status |
//! |--------------------------------------|--------|
//! | paired and acknowledged              | 200    |
//! | no peer in time, or no ack in time   | 408    |
//! | key busy with the same role          | 409    |
//! | method other than `GET`/`PUT`        | 405    |

mod body;
mod config;
mod error;
mod handler;
mod registry;
mod rendezvous;
mod server;
mod slot;

pub use body::{PipeBody, ResponseBody, Upload};
pub use config::{Arguments, PipeOptions, ServerConfig};
pub use error::PipeError;
pub use handler::PipeHandler;
pub use registry::Registry;
pub use rendezvous::{Delivery, Rendezvous, SlotGuard};
pub use server::Server;
pub use slot::{Ack, Slot};
