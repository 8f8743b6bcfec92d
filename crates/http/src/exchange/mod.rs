//! One HTTP request/response pair.
//!
//! A [`HttpServerExchange`] is created by the connection when a request head has been
//! parsed and is handed to the handler chain by [`dispatch`](crate::handler::dispatch).
//! It owns the request head, the not yet read body, the response status and headers,
//! and a typed attachment map for state shared between handlers.
//!
//! The body channels are one-shot: [`request_channel`](HttpServerExchange::request_channel)
//! and [`response_channel`](HttpServerExchange::response_channel) each succeed once.
//! The response is complete when the response channel was shut down, or when the
//! exchange and all of its channels have been dropped; an untouched response then
//! goes out with the current status and an empty body.

mod attachment;
mod channel;
mod state;

pub use attachment::AttachmentKey;
pub use channel::{RequestChannel, ResponseChannel};
pub use state::{ResponseHeaders, ResponseHeadersMut};

pub(crate) use state::{ExchangeState, ResponseFrame, ResponseSlot};
pub(crate) use state::{ABORTED, NON_PERSISTENT, RESPONSE_STARTED, RESPONSE_TERMINATED};

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use tokio::io::AsyncWriteExt;

use crate::channel::{ChannelWrapper, StreamSinkChannel, StreamSourceChannel};
use crate::options::OptionMap;
use crate::protocol::body::ReqBody;
use crate::protocol::{ExchangeError, HttpError, PayloadSize, RequestHeader, SendError};
use attachment::Attachments;
use channel::{BodyReader, ExchangeSink, acquire};
use state::{CONTINUE_SENT, FRAME_BUFFER, REQUEST_CHANNEL_ACQUIRED, REQUEST_TERMINATED, RESPONSE_CHANNEL_ACQUIRED};

type RequestWrapper = Box<dyn ChannelWrapper<StreamSourceChannel>>;
type ResponseWrapper = Box<dyn ChannelWrapper<StreamSinkChannel>>;

pub struct HttpServerExchange {
    request: RequestHeader,
    payload_size: PayloadSize,
    body: Option<ReqBody>,
    state: Arc<ExchangeState>,
    frames: mpsc::Sender<ResponseFrame>,
    request_wrappers: Vec<RequestWrapper>,
    response_wrappers: Vec<ResponseWrapper>,
    attachments: Attachments,
    options: OptionMap,
}

impl HttpServerExchange {
    pub(crate) fn new(request: RequestHeader, payload_size: PayloadSize, body: ReqBody, options: OptionMap) -> (Self, ResponseSlot) {
        let (frames, receiver) = mpsc::channel(FRAME_BUFFER);
        let state = Arc::new(ExchangeState::new(StatusCode::OK));
        if payload_size == PayloadSize::Empty {
            state.set(REQUEST_TERMINATED);
        }
        if !request.is_persistent() {
            state.set(NON_PERSISTENT);
        }

        let slot = ResponseSlot {
            frames: receiver,
            state: Arc::clone(&state),
            version: request.version(),
            persistent: request.is_persistent(),
            head_request: request.method() == Method::HEAD,
            done: None,
        };

        let exchange = Self {
            request,
            payload_size,
            body: Some(body),
            state,
            frames,
            request_wrappers: Vec::new(),
            response_wrappers: Vec::new(),
            attachments: Attachments::default(),
            options,
        };
        (exchange, slot)
    }

    /// An exchange not bound to any connection, with an empty request body. Its response
    /// can be prepared but writing it fails. Useful to evaluate predicates and handlers
    /// that only inspect or decorate the exchange.
    pub fn new_detached(request: RequestHeader) -> Self {
        let (exchange, _slot) = Self::new(request, PayloadSize::Empty, ReqBody::empty(), OptionMap::empty());
        exchange
    }

    pub fn request(&self) -> &RequestHeader {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.request.query()
    }

    pub fn version(&self) -> Version {
        self.request.version()
    }

    pub fn request_headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// How the request body is framed on the wire.
    pub fn request_payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    pub fn response_code(&self) -> StatusCode {
        self.state.status()
    }

    /// Fails once the response has started.
    pub fn set_response_code(&mut self, status: StatusCode) -> Result<(), ExchangeError> {
        self.state.set_status(status)
    }

    pub fn response_headers(&self) -> ResponseHeaders<'_> {
        self.state.headers()
    }

    /// Fails once the response has started.
    ///
    /// The returned guard holds the response lock and must not be kept across an `.await`.
    pub fn response_headers_mut(&mut self) -> Result<ResponseHeadersMut<'_>, ExchangeError> {
        self.state.headers_mut()
    }

    pub fn is_response_started(&self) -> bool {
        self.state.is_set(RESPONSE_STARTED)
    }

    pub fn is_response_complete(&self) -> bool {
        self.state.is_set(RESPONSE_TERMINATED)
    }

    /// The request body has been read to its end.
    pub fn is_request_complete(&self) -> bool {
        self.state.is_set(REQUEST_TERMINATED)
    }

    pub fn is_request_channel_available(&self) -> bool {
        !self.state.is_set(REQUEST_CHANNEL_ACQUIRED)
    }

    pub fn is_response_channel_available(&self) -> bool {
        !self.state.is_set(RESPONSE_CHANNEL_ACQUIRED)
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    /// Registers a decorator applied to the request channel when it is acquired.
    /// Wrappers apply in registration order, the first one innermost.
    pub fn add_request_wrapper<W>(&mut self, wrapper: W)
    where
        W: ChannelWrapper<StreamSourceChannel> + 'static,
    {
        self.request_wrappers.push(Box::new(wrapper));
    }

    /// Registers a decorator applied to the response channel when it is acquired.
    /// Wrappers apply in registration order, the first one innermost.
    pub fn add_response_wrapper<W>(&mut self, wrapper: W)
    where
        W: ChannelWrapper<StreamSinkChannel> + 'static,
    {
        self.response_wrappers.push(Box::new(wrapper));
    }

    pub fn has_response_wrappers(&self) -> bool {
        !self.response_wrappers.is_empty()
    }

    /// The request body. Fails on every call after the first.
    pub fn request_channel(&mut self) -> Result<RequestChannel, ExchangeError> {
        acquire(&self.state, REQUEST_CHANNEL_ACQUIRED, ExchangeError::RequestChannelAlreadyProvided)?;
        let body = self.body.take().unwrap_or_else(ReqBody::empty);

        let reader = BodyReader::new(body, Arc::clone(&self.state), self.frames.clone(), self.request.expects_continue());
        let mut channel: StreamSourceChannel = Box::new(reader);
        for wrapper in std::mem::take(&mut self.request_wrappers) {
            channel = wrapper.wrap(channel, self);
        }
        Ok(RequestChannel::new(channel))
    }

    /// The response body. Fails on every call after the first, and after
    /// [`send`](Self::send) was used.
    pub fn response_channel(&mut self) -> Result<ResponseChannel, ExchangeError> {
        acquire(&self.state, RESPONSE_CHANNEL_ACQUIRED, ExchangeError::ResponseChannelAlreadyProvided)?;

        let sink = ExchangeSink::new(Arc::clone(&self.state), self.frames.clone());
        let mut channel: StreamSinkChannel = Box::new(sink);
        for wrapper in std::mem::take(&mut self.response_wrappers) {
            channel = wrapper.wrap(channel, self);
        }
        Ok(ResponseChannel::new(channel, Arc::clone(&self.state)))
    }

    /// Sends `body` as the whole response and completes it.
    ///
    /// Without response wrappers the length is known up front and `Content-Length` is set.
    pub async fn send(&mut self, body: impl Into<Bytes>) -> Result<(), HttpError> {
        let body = body.into();
        let wrapped = self.has_response_wrappers();
        let mut channel = self.response_channel()?;
        if !wrapped {
            self.response_headers_mut()?.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        channel.write_all(&body).await?;
        channel.shutdown().await?;
        Ok(())
    }

    /// Like [`send`](Self::send), with `Content-Type: text/plain; charset=utf-8` unless a
    /// content type was set.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), HttpError> {
        if !self.response_headers().contains_key(CONTENT_TYPE) {
            let content_type: HeaderValue = mime::TEXT_PLAIN_UTF_8.as_ref().parse().map_err(HttpError::handler)?;
            self.response_headers_mut()?.insert(CONTENT_TYPE, content_type);
        }
        self.send(text.into()).await
    }

    /// Sends an interim `100 Continue` now. Does nothing if one was already sent, or if
    /// the request is older than HTTP/1.1 and can't receive interim responses.
    pub async fn send_continue(&mut self) -> Result<(), HttpError> {
        if self.version() < Version::HTTP_11 {
            return Ok(());
        }
        if self.is_response_started() {
            return Err(ExchangeError::ResponseAlreadyStarted.into());
        }
        if self.state.set(CONTINUE_SENT) {
            return Ok(());
        }
        self.frames.send(ResponseFrame::Continue).await.map_err(|_disconnected| SendError::ChannelClosed)?;
        Ok(())
    }

    pub fn put_attachment<T: Send + Sync + 'static>(&mut self, key: &AttachmentKey<T>, value: T) -> Option<T> {
        self.attachments.put(key, value)
    }

    pub fn attachment<T: Send + Sync + 'static>(&self, key: &AttachmentKey<T>) -> Option<&T> {
        self.attachments.get(key)
    }

    pub fn remove_attachment<T: Send + Sync + 'static>(&mut self, key: &AttachmentKey<T>) -> Option<T> {
        self.attachments.remove(key)
    }

    /// The connection will be closed after this response.
    pub fn set_persistent(&mut self, persistent: bool) {
        if persistent {
            self.state.clear(NON_PERSISTENT);
        } else {
            self.state.set(NON_PERSISTENT);
        }
    }

    pub fn is_persistent(&self) -> bool {
        !self.state.is_set(NON_PERSISTENT)
    }

    pub(crate) fn abort(&self) {
        self.state.set(ABORTED);
    }

    pub(crate) fn reset_response(&self, status: StatusCode) -> bool {
        self.state.reset_response(status)
    }
}

impl fmt::Debug for HttpServerExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerExchange")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("status", &self.response_code())
            .field("attachments", &self.attachments)
            .finish_non_exhaustive()
    }
}
