//! Response side state shared by an exchange, its body channels and the connection writer.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, StatusCode, Version};

use crate::protocol::{ExchangeError, PayloadSize, ResponseHead, build_head};

pub(crate) const REQUEST_CHANNEL_ACQUIRED: u16 = 1;
pub(crate) const RESPONSE_CHANNEL_ACQUIRED: u16 = 1 << 1;
pub(crate) const RESPONSE_STARTED: u16 = 1 << 2;
pub(crate) const REQUEST_TERMINATED: u16 = 1 << 3;
pub(crate) const RESPONSE_TERMINATED: u16 = 1 << 4;
pub(crate) const CONTINUE_SENT: u16 = 1 << 5;
pub(crate) const ABORTED: u16 = 1 << 6;
pub(crate) const NON_PERSISTENT: u16 = 1 << 7;

/// Frames per exchange the writer may lag behind before body writes wait.
pub(crate) const FRAME_BUFFER: usize = 16;

/// What an exchange hands to the connection writer, in order.
#[derive(Debug)]
pub(crate) enum ResponseFrame {
    Continue,
    Head(ResponseHead, PayloadSize),
    Chunk(Bytes),
    Eof,
}

#[derive(Debug)]
struct ResponseParts {
    status: StatusCode,
    headers: HeaderMap,
}

#[derive(Debug)]
pub(crate) struct ExchangeState {
    flags: AtomicU16,
    response: Mutex<ResponseParts>,
}

impl ExchangeState {
    pub(crate) fn new(status: StatusCode) -> Self {
        Self { flags: AtomicU16::new(0), response: Mutex::new(ResponseParts { status, headers: HeaderMap::new() }) }
    }

    fn parts(&self) -> MutexGuard<'_, ResponseParts> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_set(&self, flag: u16) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    /// Sets `flag`, returning whether it was already set.
    pub(crate) fn set(&self, flag: u16) -> bool {
        self.flags.fetch_or(flag, Ordering::AcqRel) & flag != 0
    }

    pub(crate) fn clear(&self, flag: u16) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.parts().status
    }

    pub(crate) fn set_status(&self, status: StatusCode) -> Result<(), ExchangeError> {
        let mut parts = self.parts();
        if self.is_set(RESPONSE_STARTED) {
            return Err(ExchangeError::ResponseAlreadyStarted);
        }
        parts.status = status;
        Ok(())
    }

    pub(crate) fn headers(&self) -> ResponseHeaders<'_> {
        ResponseHeaders { parts: self.parts() }
    }

    pub(crate) fn headers_mut(&self) -> Result<ResponseHeadersMut<'_>, ExchangeError> {
        let parts = self.parts();
        if self.is_set(RESPONSE_STARTED) {
            return Err(ExchangeError::ResponseAlreadyStarted);
        }
        Ok(ResponseHeadersMut { parts })
    }

    /// Answers with `status` and no headers instead of whatever was prepared, as long as
    /// nothing was sent yet. Returns `false` when the response already started.
    pub(crate) fn reset_response(&self, status: StatusCode) -> bool {
        let mut parts = self.parts();
        if self.is_set(RESPONSE_STARTED) {
            return false;
        }
        parts.status = status;
        parts.headers.clear();
        self.clear(ABORTED);
        true
    }

    /// Fixes status and headers and decides the body framing.
    ///
    /// `body_length` is the total body size when it is already known, which is the case
    /// when the body is completed before anything was sent.
    pub(crate) fn start_response(&self, body_length: Option<u64>) -> Result<(ResponseHead, PayloadSize), ExchangeError> {
        let parts = self.parts();
        if self.set(RESPONSE_STARTED) {
            return Err(ExchangeError::ResponseAlreadyStarted);
        }

        let declared = parts.headers.get(CONTENT_LENGTH).and_then(|value| value.to_str().ok()).and_then(|value| value.trim().parse::<u64>().ok());
        let payload_size = if parts.status.is_informational() || matches!(parts.status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED) {
            PayloadSize::Empty
        } else {
            match (declared, body_length) {
                (Some(length), _) | (None, Some(length)) if length > 0 => PayloadSize::Length(length),
                (Some(_), _) | (None, Some(_)) => PayloadSize::Empty,
                (None, None) => PayloadSize::Chunked,
            }
        };

        Ok((build_head(parts.status, parts.headers.clone()), payload_size))
    }
}

/// Read access to the response headers. Holds the exchange's response lock.
#[derive(Debug)]
pub struct ResponseHeaders<'a> {
    parts: MutexGuard<'a, ResponseParts>,
}

impl std::ops::Deref for ResponseHeaders<'_> {
    type Target = HeaderMap;

    fn deref(&self) -> &HeaderMap {
        &self.parts.headers
    }
}

/// Write access to the response headers of a response not yet started. Holds the
/// exchange's response lock, so the response cannot start while this is alive.
#[derive(Debug)]
pub struct ResponseHeadersMut<'a> {
    parts: MutexGuard<'a, ResponseParts>,
}

impl std::ops::Deref for ResponseHeadersMut<'_> {
    type Target = HeaderMap;

    fn deref(&self) -> &HeaderMap {
        &self.parts.headers
    }
}

impl std::ops::DerefMut for ResponseHeadersMut<'_> {
    fn deref_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }
}

/// The connection writer's end of one exchange.
#[derive(Debug)]
pub(crate) struct ResponseSlot {
    pub(crate) frames: mpsc::Receiver<ResponseFrame>,
    pub(crate) state: Arc<ExchangeState>,
    pub(crate) version: Version,
    pub(crate) persistent: bool,
    pub(crate) head_request: bool,
    pub(crate) done: Option<oneshot::Sender<bool>>,
}

impl ResponseSlot {
    /// A slot answered with `status` and no body, closing the connection afterwards.
    /// Used when a request could not be parsed into an exchange at all.
    pub(crate) fn reject(status: StatusCode) -> Self {
        let (_, frames) = mpsc::channel(0);
        let state = Arc::new(ExchangeState::new(status));
        state.set(NON_PERSISTENT);
        Self { frames, state, version: Version::HTTP_11, persistent: false, head_request: false, done: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn status_is_frozen_once_started() {
        let state = ExchangeState::new(StatusCode::OK);
        state.set_status(StatusCode::CREATED).unwrap();
        assert_eq!(state.status(), StatusCode::CREATED);

        let (head, _) = state.start_response(None).unwrap();
        assert_eq!(head.status(), StatusCode::CREATED);
        assert_eq!(state.set_status(StatusCode::OK), Err(ExchangeError::ResponseAlreadyStarted));
        assert!(state.headers_mut().is_err());
        assert!(matches!(state.start_response(None), Err(ExchangeError::ResponseAlreadyStarted)));
        assert!(!state.reset_response(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn framing_decisions() {
        let state = ExchangeState::new(StatusCode::OK);
        assert_eq!(state.start_response(None).unwrap().1, PayloadSize::Chunked);

        let state = ExchangeState::new(StatusCode::OK);
        assert_eq!(state.start_response(Some(12)).unwrap().1, PayloadSize::Length(12));

        let state = ExchangeState::new(StatusCode::OK);
        assert_eq!(state.start_response(Some(0)).unwrap().1, PayloadSize::Empty);

        let state = ExchangeState::new(StatusCode::OK);
        state.headers_mut().unwrap().insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(state.start_response(None).unwrap().1, PayloadSize::Length(5));

        let state = ExchangeState::new(StatusCode::NO_CONTENT);
        assert_eq!(state.start_response(Some(3)).unwrap().1, PayloadSize::Empty);
    }

    #[test]
    fn reset_clears_headers_and_abort() {
        let state = ExchangeState::new(StatusCode::OK);
        state.headers_mut().unwrap().insert("x-partial", HeaderValue::from_static("1"));
        state.set(ABORTED);

        assert!(state.reset_response(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(state.headers().is_empty());
        assert!(!state.is_set(ABORTED));
        assert_eq!(state.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
