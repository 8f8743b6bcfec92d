use async_trait::async_trait;
use http::StatusCode;
use tracing::trace;

use super::{HttpHandler, Predicate, ResponseCodeHandler, TruePredicate};
use crate::exchange::HttpServerExchange;
use crate::protocol::HttpError;

/// Whether the client waits for an interim `100 Continue` before sending the body.
pub fn requires_continue(exchange: &HttpServerExchange) -> bool {
    exchange.request().expects_continue()
}

/// Answers `Expect: 100-continue` before the body is sent.
///
/// [`accept_request`](Self::accept_request) decides, backed by the predicate `P`. An
/// accepted request gets `100 Continue` right away and is passed to the next handler. A
/// rejected one is answered `417 Expectation Failed`: the next handler never runs and the
/// body is never read, the connection discards whatever the client sends anyway before
/// it parses the next request. Requests without the expectation go straight to next.
pub struct HttpContinueHandler<P = TruePredicate> {
    accept: P,
    next: Box<dyn HttpHandler>,
}

impl HttpContinueHandler {
    /// Accepts every request.
    pub fn new<H: HttpHandler + 'static>(next: H) -> Self {
        Self::with_predicate(TruePredicate, next)
    }
}

impl Default for HttpContinueHandler {
    fn default() -> Self {
        Self::new(ResponseCodeHandler::NOT_FOUND)
    }
}

impl<P: Predicate> HttpContinueHandler<P> {
    pub fn with_predicate<H: HttpHandler + 'static>(accept: P, next: H) -> Self {
        Self { accept, next: Box::new(next) }
    }

    pub fn set_next<H: HttpHandler + 'static>(&mut self, next: H) -> &mut Self {
        self.next = Box::new(next);
        self
    }

    pub fn accept_request(&self, exchange: &HttpServerExchange) -> bool {
        self.accept.resolve(exchange)
    }
}

#[async_trait]
impl<P: Predicate> HttpHandler for HttpContinueHandler<P> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        if !requires_continue(exchange) {
            return self.next.handle_request(exchange).await;
        }

        if self.accept_request(exchange) {
            exchange.send_continue().await?;
            self.next.handle_request(exchange).await
        } else {
            trace!(path = exchange.path(), "rejecting 100-continue");
            exchange.set_response_code(StatusCode::EXPECTATION_FAILED)?;
            Ok(())
        }
    }
}

impl<P> std::fmt::Debug for HttpContinueHandler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContinueHandler").finish_non_exhaustive()
    }
}
