//! Caps the number of requests running at the same time in a handler subtree.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use conduit_http::exchange::HttpServerExchange;
use conduit_http::handler::{HttpHandler, ResponseCodeHandler};
use conduit_http::protocol::HttpError;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{trace, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestLimitError {
    #[error("Maximum concurrent requests must be larger than zero.")]
    ZeroMaximum,
}

/// Lets at most `max_requests` requests into `next` at once.
///
/// Requests over the limit wait for a slot. With a queue size set, a request that finds
/// the queue full is answered by the failure handler instead, `503` by default. A slot
/// is held until `next` returns.
pub struct RequestLimitHandler<H> {
    permits: Semaphore,
    max_requests: usize,
    queue_size: Option<usize>,
    queued: AtomicUsize,
    next: H,
    failure_handler: Box<dyn HttpHandler>,
}

impl<H: HttpHandler> RequestLimitHandler<H> {
    pub fn new(max_requests: usize, next: H) -> Result<Self, RequestLimitError> {
        if max_requests == 0 {
            return Err(RequestLimitError::ZeroMaximum);
        }
        Ok(Self {
            permits: Semaphore::new(max_requests),
            max_requests,
            queue_size: None,
            queued: AtomicUsize::new(0),
            next,
            failure_handler: Box::new(ResponseCodeHandler::SERVICE_UNAVAILABLE),
        })
    }

    /// Requests allowed to wait for a slot; `0` rejects every request over the limit.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = Some(queue_size);
        self
    }

    pub fn with_failure_handler(mut self, failure_handler: impl HttpHandler + 'static) -> Self {
        self.failure_handler = Box::new(failure_handler);
        self
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Requests currently inside `next`.
    pub fn active_requests(&self) -> usize {
        self.max_requests - self.permits.available_permits()
    }

    fn enter_queue(&self) -> Option<QueueGuard<'_>> {
        let admitted = match self.queue_size {
            None => {
                self.queued.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => {
                self.queued.fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| (queued < limit).then_some(queued + 1)).is_ok()
            }
        };
        admitted.then_some(QueueGuard(&self.queued))
    }
}

struct QueueGuard<'a>(&'a AtomicUsize);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl<H: HttpHandler> HttpHandler for RequestLimitHandler<H> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        let _permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                let Some(_queued) = self.enter_queue() else {
                    warn!(max_requests = self.max_requests, path = exchange.path(), "request limit reached and queue full");
                    return self.failure_handler.handle_request(exchange).await;
                };
                trace!(path = exchange.path(), "request limit reached, waiting for a slot");
                self.permits.acquire().await.map_err(HttpError::handler)?
            }
            Err(e @ TryAcquireError::Closed) => return Err(HttpError::handler(e)),
        };
        self.next.handle_request(exchange).await
    }
}

impl<H> std::fmt::Debug for RequestLimitHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimitHandler")
            .field("max_requests", &self.max_requests)
            .field("queue_size", &self.queue_size)
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
