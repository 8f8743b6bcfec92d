//! A non-blocking HTTP/1.1 server engine built around the exchange.
//!
//! Every request read from a connection becomes an [`exchange::HttpServerExchange`]: the
//! request head, a one-shot channel for the request body, a one-shot channel for the
//! response body and the response status and headers that can still be changed until
//! the response starts. Handlers implement [`handler::HttpHandler`] and are chained by
//! wrapping one another.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_http::connection::HttpConnection;
//! use conduit_http::handler::handler_fn;
//! use conduit_http::options::{IDLE_TIMEOUT, OptionMap};
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let options = OptionMap::builder().set(&IDLE_TIMEOUT, 30_000).build();
//!     let handler = Arc::new(handler_fn(|exchange| {
//!         Box::pin(async move {
//!             info!(path = exchange.path(), "request");
//!             exchange.send_text("Hello World!").await
//!         })
//!     }));
//!
//!     loop {
//!         let (stream, _remote_addr) = match listener.accept().await {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!         let handler = Arc::clone(&handler);
//!         let options = options.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             if let Err(e) = HttpConnection::with_options(reader, writer, options).process(handler).await {
//!                 error!(cause = %e, "connection shutdown");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`connection`]: the keep-alive, pipelining and timeout loop of one connection
//! - [`exchange`]: the exchange and its request and response channels
//! - [`handler`]: the handler trait, the error boundary, predicate routing and `100-continue`
//! - [`channel`]: byte-wise channel functions and channel wrappers
//! - [`options`]: typed option keys and the immutable [`options::OptionMap`]
//! - [`codec`]: the HTTP/1.1 wire codec
//! - [`protocol`]: heads, payload frames and the error types
//! - [`session`]: attaching a session manager to exchanges
//!
//! # Limitations
//!
//! - HTTP/1.1 only, no upgrades to other protocols
//! - no TLS, put a terminating proxy in front
//! - at most [`codec::MAX_HEADER_NUM`] request headers

pub mod channel;
pub mod codec;
pub mod connection;
pub mod exchange;
pub mod handler;
pub mod options;
pub mod protocol;
pub mod session;

mod date;
mod utils;
pub(crate) use utils::ensure;
