//! Error kinds raised by the engine.
//!
//! The set is closed: every failure that can reach the dispatch boundary is one of
//! [`HttpError`]'s variants, and [`HttpError::status_code`] is the single place that
//! turns an error kind into an HTTP status.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("illegal exchange state: {source}")]
    StateError {
        #[from]
        source: ExchangeError,
    },

    #[error("handler error: {source}")]
    HandlerError { source: Box<dyn StdError + Send + Sync> },
}

impl HttpError {
    /// Wraps an application failure that escaped a handler.
    pub fn handler<E: Into<Box<dyn StdError + Send + Sync>>>(e: E) -> Self {
        Self::HandlerError { source: e.into() }
    }

    /// The status written when this error reaches dispatch before the response started.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::RequestError { source } => source.status_code(),
            HttpError::ResponseError { .. } | HttpError::StateError { .. } | HttpError::HandlerError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Protocol errors leave the connection's framing untrustworthy.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, HttpError::RequestError { .. })
    }
}

/// Reading a request channel reports failures as `io::Error`; a decoding failure
/// travels inside it and is recovered here so `?` keeps the original kind.
impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_none() {
            return SendError::io(e).into();
        }

        let kind = e.kind();
        let Some(inner) = e.into_inner() else {
            return SendError::io(io::Error::from(kind)).into();
        };

        match inner.downcast::<ParseError>() {
            Ok(parse_error) => Self::from(*parse_error),
            Err(inner) => match inner.downcast::<SendError>() {
                Ok(send_error) => Self::from(*send_error),
                Err(inner) => match inner.downcast::<ExchangeError>() {
                    Ok(exchange_error) => Self::from(*exchange_error),
                    Err(inner) => SendError::io(io::Error::new(kind, inner)).into(),
                },
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("entity size exceed the limit {max_size}")]
    TooLargeEntity { max_size: u64 },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("no bytes received within {0:?}")]
    Timeout(Duration),

    #[error("io error: {source}")]
    Io { source: io::Error },
}

/// A `ParseError` carried inside an `io::Error`, as the idle timeout produces one, is
/// unwrapped rather than nested.
impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<ParseError>()) {
            let kind = e.kind();
            return match e.into_inner().map(|inner| inner.downcast::<ParseError>()) {
                Some(Ok(parse_error)) => *parse_error,
                _ => Self::Io { source: io::Error::from(kind) },
            };
        }
        Self::Io { source: e }
    }
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn too_large_entity(max_size: u64) -> Self {
        Self::TooLargeEntity { max_size }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::from(e.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ParseError::TooLargeEntity { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ParseError::TooLargeHeader { .. } | ParseError::TooManyHeaders { .. } => {
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            ParseError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// A copy handed to the body consumer while the connection keeps the original.
    /// I/O sources are rebuilt from their kind and message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::TooLargeHeader { current_size, max_size } => Self::too_large_header(*current_size, *max_size),
            Self::TooManyHeaders { max_num } => Self::too_many_headers(*max_num),
            Self::TooLargeEntity { max_size } => Self::too_large_entity(*max_size),
            Self::InvalidHeader { reason } => Self::invalid_header(reason),
            Self::InvalidVersion(version) => Self::InvalidVersion(*version),
            Self::InvalidMethod => Self::InvalidMethod,
            Self::InvalidUri => Self::InvalidUri,
            Self::InvalidContentLength { reason } => Self::invalid_content_length(reason),
            Self::InvalidBody { reason } => Self::invalid_body(reason),
            Self::Timeout(duration) => Self::Timeout(*duration),
            Self::Io { source } => Self::io(io::Error::new(source.kind(), source.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error(
        "close() called with data still to be flushed. Please call shutdown_writes() and then call flush() until it returns true before calling close()"
    )]
    UnflushedData,

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("response aborted: {reason}")]
    Aborted { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn aborted<S: ToString>(str: S) -> Self {
        Self::Aborted { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Channel operations surface as `io::Error`; the send error rides inside it.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            SendError::Io { source } => source,
            SendError::ChannelClosed => io::Error::new(io::ErrorKind::BrokenPipe, self),
            other => io::Error::other(other),
        }
    }
}

/// Contract violations on an exchange. These are programming errors, never transient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("The response has already been started")]
    ResponseAlreadyStarted,

    #[error("the response channel has already been provided")]
    ResponseChannelAlreadyProvided,

    #[error("the request channel has already been provided")]
    RequestChannelAlreadyProvided,

    #[error("Session not found {0}")]
    SessionNotFound(String),

    #[error(
        "Session manager was not attached to the request. Make sure that the SessionAttachmentHandler is installed in the handler chain"
    )]
    SessionManagerNotAttached,
}
