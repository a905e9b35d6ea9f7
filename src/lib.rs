//! Lightweight JSON RPC over Unix domain sockets.
//!
//! A [`Server`] exposes named methods backed by user-supplied handlers;
//! [`Client`]s invoke them with JSON arguments and receive JSON results.
//! The wire payload is plain UTF-8 JSON over a filesystem stream socket,
//! one request and one response per round-trip, with no framing and no
//! correlation ids. The socket file's permissions are the only access
//! control.
//!
//! ## Architecture
//!
//! - `protocol`: the `{method, params}` request envelope
//! - `methods`: bounded, mutex-guarded name-to-handler table
//! - `server`: accept thread plus a fixed pool of worker threads, each
//!   multiplexing its connections with an edge-triggered readiness set
//! - `client`: mutex-serialized synchronous calls and a
//!   thread-per-call asynchronous shim
//! - `logging`: tracing subscriber setup for binaries
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use sockrpc::{Client, Server};
//!
//! # fn main() -> sockrpc::Result<()> {
//! let mut server = Server::new("/tmp/demo.sock")?;
//! server.register("add", |params| {
//!     let a = params.get(0)?.as_i64()?;
//!     let b = params.get(1)?.as_i64()?;
//!     Some(json!(a + b))
//! });
//! server.start()?;
//!
//! let client = Client::connect("/tmp/demo.sock")?;
//! let sum = client.call_sync("add", Some(json!([5, 3])));
//! assert_eq!(sum, Some(json!(8)));
//! # Ok(())
//! # }
//! ```
//!
//! Handlers own their input and return an owned result, or `None` for
//! the explicit no-result sentinel (distinct from the JSON literal
//! `null`, which is a present value). They must be reentrant: the same
//! handler may run concurrently on distinct worker threads.

pub mod client;
pub mod error;
pub mod logging;
pub mod methods;
pub mod protocol;
pub mod server;

pub use client::{Client, ResultCallback};
pub use error::{Error, Result};
pub use methods::{Handler, MAX_METHODS};
pub use protocol::{Request, BUFFER_SIZE};
pub use server::{Server, ServerConfig};
