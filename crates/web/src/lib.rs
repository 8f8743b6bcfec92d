//! Glue around the `conduit-http` engine: a TCP server, a predicate library and
//! reusable handlers.
//!
//! ```no_run
//! use conduit_http::handler::{PredicateHandler, ResponseCodeHandler, handler_fn};
//! use conduit_web::encoding::EncodingHandler;
//! use conduit_web::predicate::path;
//! use conduit_web::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hello = handler_fn(|exchange| Box::pin(async move { exchange.send_text("hello world").await }));
//!     let root = PredicateHandler::new(path("/"), hello, ResponseCodeHandler::NOT_FOUND);
//!
//!     Server::builder()
//!         .address("127.0.0.1:3000")
//!         .handler(EncodingHandler::new(root))
//!         .build()
//!         .unwrap()
//!         .start()
//!         .await;
//! }
//! ```

mod server;

pub mod encoding;
pub mod limit;
pub mod predicate;

pub use encoding::EncodingHandler;
pub use limit::RequestLimitHandler;
pub use server::{Server, ServerBuildError, ServerBuilder};
