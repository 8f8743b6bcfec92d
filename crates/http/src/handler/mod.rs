//! Handler chain and the dispatch boundary.
//!
//! A handler acts on an exchange: it inspects the request, reads the body, writes the
//! response, or delegates to a next handler it holds. Errors travel up the chain with `?`
//! and are dealt with in exactly one place, [`dispatch`].

mod http_continue;
mod predicate;

pub use http_continue::{HttpContinueHandler, requires_continue};
pub use predicate::{FalsePredicate, Predicate, PredicateFn, PredicateHandler, TruePredicate, fn_predicate};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use tracing::{error, warn};

use crate::exchange::HttpServerExchange;
use crate::protocol::HttpError;

#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError>;
}

#[async_trait]
impl<H: HttpHandler + ?Sized> HttpHandler for Arc<H> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        self.as_ref().handle_request(exchange).await
    }
}

#[async_trait]
impl<H: HttpHandler + ?Sized> HttpHandler for Box<H> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        self.as_ref().handle_request(exchange).await
    }
}

/// A handler from a closure returning a boxed future.
///
/// ```
/// use conduit_http::handler::handler_fn;
///
/// let hello = handler_fn(|exchange| Box::pin(async move { exchange.send_text("Hello World!").await }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HttpServerExchange) -> BoxFuture<'a, Result<(), HttpError>> + Send + Sync,
{
    HandlerFn { f }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> HttpHandler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HttpServerExchange) -> BoxFuture<'a, Result<(), HttpError>> + Send + Sync,
{
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        (self.f)(exchange).await
    }
}

/// Answers every request with a fixed status and an empty body.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCodeHandler {
    status: StatusCode,
}

impl ResponseCodeHandler {
    pub const OK: Self = Self::new(StatusCode::OK);
    pub const BAD_REQUEST: Self = Self::new(StatusCode::BAD_REQUEST);
    pub const FORBIDDEN: Self = Self::new(StatusCode::FORBIDDEN);
    pub const NOT_FOUND: Self = Self::new(StatusCode::NOT_FOUND);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(StatusCode::METHOD_NOT_ALLOWED);
    pub const EXPECTATION_FAILED: Self = Self::new(StatusCode::EXPECTATION_FAILED);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(StatusCode::INTERNAL_SERVER_ERROR);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(StatusCode::SERVICE_UNAVAILABLE);

    pub const fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

#[async_trait]
impl HttpHandler for ResponseCodeHandler {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        exchange.set_response_code(self.status)?;
        Ok(())
    }
}

/// Runs `handler` against `exchange`. This is the only place handler failures are caught.
///
/// A returned error or a panic is logged. If the response has not started it is replaced
/// by an empty one with the status the error maps to, and a protocol error also closes
/// the connection afterwards. Otherwise the exchange is aborted, which severs the
/// connection once the bytes already queued are out.
pub async fn dispatch<H>(handler: &H, exchange: &mut HttpServerExchange)
where
    H: HttpHandler + ?Sized,
{
    let result = AssertUnwindSafe(handler.handle_request(exchange)).catch_unwind().await;

    let error = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(method = %exchange.method(), path = exchange.path(), cause = message, "handler panicked");
            HttpError::handler(format!("handler panicked: {message}"))
        }
    };

    if exchange.reset_response(error.status_code()) {
        warn!(method = %exchange.method(), path = exchange.path(), status = %error.status_code(), cause = %error, "handler failed");
        if error.is_protocol_error() {
            exchange.set_persistent(false);
        }
    } else {
        error!(method = %exchange.method(), path = exchange.path(), cause = %error, "handler failed after the response started, aborting");
        exchange.abort();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
