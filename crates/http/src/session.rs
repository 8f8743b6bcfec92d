//! The boundary towards session management.
//!
//! The engine knows nothing about sessions beyond this: a [`SessionManager`] is attached
//! to an exchange under [`SESSION_MANAGER`] by a [`SessionAttachmentHandler`] somewhere
//! up the chain, and handlers further down look it up.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::exchange::{AttachmentKey, HttpServerExchange};
use crate::handler::HttpHandler;
use crate::protocol::{ExchangeError, HttpError};

#[cfg_attr(test, mockall::automock)]
pub trait SessionManager: Send + Sync {
    /// The name of the deployment the sessions belong to.
    fn deployment_name(&self) -> String;

    fn contains_session(&self, id: &str) -> bool;
}

pub static SESSION_MANAGER: AttachmentKey<Arc<dyn SessionManager>> = AttachmentKey::new("session_manager");

/// Attaches a session manager to every exchange, then delegates.
pub struct SessionAttachmentHandler<H> {
    manager: Arc<dyn SessionManager>,
    next: H,
}

impl<H: HttpHandler> SessionAttachmentHandler<H> {
    pub fn new(manager: Arc<dyn SessionManager>, next: H) -> Self {
        Self { manager, next }
    }
}

#[async_trait]
impl<H: HttpHandler> HttpHandler for SessionAttachmentHandler<H> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        exchange.put_attachment(&SESSION_MANAGER, Arc::clone(&self.manager));
        self.next.handle_request(exchange).await
    }
}

impl<H> fmt::Debug for SessionAttachmentHandler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAttachmentHandler").field("deployment", &self.manager.deployment_name()).finish_non_exhaustive()
    }
}

pub fn session_manager(exchange: &HttpServerExchange) -> Result<&Arc<dyn SessionManager>, ExchangeError> {
    exchange.attachment(&SESSION_MANAGER).ok_or(ExchangeError::SessionManagerNotAttached)
}

/// Fails unless the attached manager knows the session `id`.
pub fn require_session(exchange: &HttpServerExchange, id: &str) -> Result<(), ExchangeError> {
    if session_manager(exchange)?.contains_session(id) {
        Ok(())
    } else {
        Err(ExchangeError::SessionNotFound(id.to_owned()))
    }
}
