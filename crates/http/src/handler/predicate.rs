use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::HttpHandler;
use crate::exchange::HttpServerExchange;
use crate::protocol::HttpError;

/// A boolean test over an exchange.
///
/// Predicates only read the exchange. They are evaluated once per dispatch, before the
/// chosen branch runs.
#[cfg_attr(test, mockall::automock)]
pub trait Predicate: Send + Sync {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool;
}

impl<P: Predicate + ?Sized> Predicate for Arc<P> {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        self.as_ref().resolve(exchange)
    }
}

impl<P: Predicate + ?Sized> Predicate for Box<P> {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        self.as_ref().resolve(exchange)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TruePredicate;

impl Predicate for TruePredicate {
    fn resolve(&self, _exchange: &HttpServerExchange) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FalsePredicate;

impl Predicate for FalsePredicate {
    fn resolve(&self, _exchange: &HttpServerExchange) -> bool {
        false
    }
}

pub fn fn_predicate<F>(f: F) -> PredicateFn<F>
where
    F: Fn(&HttpServerExchange) -> bool + Send + Sync,
{
    PredicateFn { f }
}

#[derive(Debug, Clone)]
pub struct PredicateFn<F> {
    f: F,
}

impl<F> Predicate for PredicateFn<F>
where
    F: Fn(&HttpServerExchange) -> bool + Send + Sync,
{
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        (self.f)(exchange)
    }
}

type PredicateSlot = ArcSwap<Box<dyn Predicate>>;
type HandlerSlot = ArcSwap<Box<dyn HttpHandler>>;

/// Routes an exchange to one of two handlers depending on a predicate.
///
/// The predicate and both branches can be replaced at any time through a shared
/// reference. A dispatch in flight loads the predicate once and the chosen branch once,
/// so it never sees a mix of old and new values. Concurrent replacements of the same
/// slot are not ordered against each other: the last store wins.
///
/// ```
/// use conduit_http::handler::{PredicateHandler, ResponseCodeHandler, fn_predicate};
///
/// let handler = PredicateHandler::new(
///     fn_predicate(|exchange| exchange.path().starts_with("/admin")),
///     ResponseCodeHandler::FORBIDDEN,
///     ResponseCodeHandler::OK,
/// );
/// handler.set_false_handler(ResponseCodeHandler::NOT_FOUND);
/// ```
pub struct PredicateHandler {
    predicate: PredicateSlot,
    true_handler: HandlerSlot,
    false_handler: HandlerSlot,
}

impl PredicateHandler {
    pub fn new<P, T, F>(predicate: P, true_handler: T, false_handler: F) -> Self
    where
        P: Predicate + 'static,
        T: HttpHandler + 'static,
        F: HttpHandler + 'static,
    {
        Self {
            predicate: ArcSwap::from_pointee(Box::new(predicate)),
            true_handler: ArcSwap::from_pointee(Box::new(true_handler)),
            false_handler: ArcSwap::from_pointee(Box::new(false_handler)),
        }
    }

    pub fn predicate(&self) -> Arc<Box<dyn Predicate>> {
        self.predicate.load_full()
    }

    pub fn set_predicate<P: Predicate + 'static>(&self, predicate: P) -> &Self {
        self.predicate.store(Arc::new(Box::new(predicate)));
        self
    }

    pub fn true_handler(&self) -> Arc<Box<dyn HttpHandler>> {
        self.true_handler.load_full()
    }

    pub fn set_true_handler<H: HttpHandler + 'static>(&self, handler: H) -> &Self {
        self.true_handler.store(Arc::new(Box::new(handler)));
        self
    }

    pub fn false_handler(&self) -> Arc<Box<dyn HttpHandler>> {
        self.false_handler.load_full()
    }

    pub fn set_false_handler<H: HttpHandler + 'static>(&self, handler: H) -> &Self {
        self.false_handler.store(Arc::new(Box::new(handler)));
        self
    }
}

#[async_trait]
impl HttpHandler for PredicateHandler {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        let matched = self.predicate.load().resolve(exchange);
        let next = if matched { self.true_handler.load_full() } else { self.false_handler.load_full() };
        next.handle_request(exchange).await
    }
}

impl fmt::Debug for PredicateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateHandler").finish_non_exhaustive()
    }
}
