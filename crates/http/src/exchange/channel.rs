//! The body channels of an exchange.
//!
//! ```text
//! handler reads  <- RequestChannel  <- wrappers <- BodyReader   <- ReqBody <- connection
//! handler writes -> ResponseChannel -> wrappers -> ExchangeSink -> frames  -> connection
//! ```

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use futures::channel::mpsc;
use futures::Sink;
use http_body::Body;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{error, trace};

use crate::channel::{StreamSinkChannel, StreamSourceChannel};
use crate::exchange::state::{
    ABORTED, CONTINUE_SENT, ExchangeState, REQUEST_TERMINATED, RESPONSE_STARTED, RESPONSE_TERMINATED, ResponseFrame,
};
use crate::protocol::body::ReqBody;
use crate::protocol::{ExchangeError, PayloadSize, SendError};

/// Bytes a [`ResponseChannel`] collects before passing them down.
const RESPONSE_BUFFER_SIZE: usize = 8 * 1024;

fn closed() -> io::Error {
    SendError::ChannelClosed.into_io()
}

/// The request body as an `AsyncRead`, after every registered request wrapper.
pub struct RequestChannel {
    inner: StreamSourceChannel,
}

impl RequestChannel {
    pub(crate) fn new(inner: StreamSourceChannel) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestChannel").finish_non_exhaustive()
    }
}

impl AsyncRead for RequestChannel {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Reads the decoded request body. Before the first read of a request that expects it,
/// a `100 Continue` is queued, unless one was sent already or the final response started.
pub(crate) struct BodyReader {
    body: ReqBody,
    current: Bytes,
    state: Arc<ExchangeState>,
    frames: mpsc::Sender<ResponseFrame>,
    wants_continue: bool,
    eof: bool,
}

impl BodyReader {
    pub(crate) fn new(body: ReqBody, state: Arc<ExchangeState>, frames: mpsc::Sender<ResponseFrame>, wants_continue: bool) -> Self {
        Self { body, current: Bytes::new(), state, frames, wants_continue, eof: false }
    }

    fn poll_continue(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.state.is_set(CONTINUE_SENT | RESPONSE_STARTED) {
            self.wants_continue = false;
            return Poll::Ready(Ok(()));
        }
        ready!(Pin::new(&mut self.frames).poll_ready(cx)).map_err(|_disconnected| closed())?;
        if !self.state.set(CONTINUE_SENT) {
            trace!("first body read, queue 100 continue");
            Pin::new(&mut self.frames).start_send(ResponseFrame::Continue).map_err(|_disconnected| closed())?;
        }
        self.wants_continue = false;
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for BodyReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.wants_continue {
            ready!(this.poll_continue(cx))?;
        }

        loop {
            if !this.current.is_empty() {
                let len = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current[..len]);
                this.current.advance(len);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        this.current = data;
                    }
                }
                Some(Err(e)) => {
                    this.eof = true;
                    return Poll::Ready(Err(io::Error::other(e)));
                }
                None => {
                    this.eof = true;
                    this.state.set(REQUEST_TERMINATED);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// nothing handed to the connection yet
    Fresh,
    Streaming,
    /// the end of body frame is queued
    Closing,
    Closed,
}

/// The bottom of the response stack: turns writes into frames for the connection.
///
/// The first write is held back. If the body ends before a second write or a flush,
/// its whole length is known and the response goes out with `Content-Length` instead
/// of chunked framing.
pub(crate) struct ExchangeSink {
    state: Arc<ExchangeState>,
    frames: mpsc::Sender<ResponseFrame>,
    phase: Phase,
    held: Option<Bytes>,
    queued: Option<ResponseFrame>,
    payload_size: PayloadSize,
    written: u64,
}

impl ExchangeSink {
    pub(crate) fn new(state: Arc<ExchangeState>, frames: mpsc::Sender<ResponseFrame>) -> Self {
        Self { state, frames, phase: Phase::Fresh, held: None, queued: None, payload_size: PayloadSize::Empty, written: 0 }
    }

    fn poll_queued(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.queued.is_some() {
            ready!(Pin::new(&mut self.frames).poll_ready(cx)).map_err(|_disconnected| closed())?;
            if let Some(frame) = self.queued.take() {
                Pin::new(&mut self.frames).start_send(frame).map_err(|_disconnected| closed())?;
            }
        }
        Poll::Ready(Ok(()))
    }

    fn start(&mut self, body_length: Option<u64>) -> io::Result<()> {
        let (head, payload_size) = self.state.start_response(body_length).map_err(io::Error::other)?;
        self.payload_size = payload_size;
        self.queued = Some(ResponseFrame::Head(head, payload_size));
        self.phase = Phase::Streaming;
        Ok(())
    }

    fn chunk(&mut self, bytes: Bytes) -> io::Result<()> {
        let len = bytes.len() as u64;
        let allowed = match self.payload_size {
            PayloadSize::Length(n) => n.saturating_sub(self.written),
            PayloadSize::Empty => 0,
            PayloadSize::Chunked => u64::MAX,
        };
        if len > allowed {
            return Err(SendError::invalid_body(format!("response body exceeds its framing {:?}", self.payload_size)).into_io());
        }
        self.written += len;
        self.queued = Some(ResponseFrame::Chunk(bytes));
        Ok(())
    }

    fn check_aborted(&self) -> io::Result<()> {
        if self.state.is_set(ABORTED) {
            return Err(SendError::aborted("exchange was aborted").into_io());
        }
        Ok(())
    }

    /// Moves the held write, or just the head, into the frame queue.
    fn poll_release(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            ready!(self.poll_queued(cx))?;
            match self.phase {
                Phase::Fresh => self.start(None)?,
                Phase::Streaming => match self.held.take() {
                    Some(bytes) => self.chunk(bytes)?,
                    None => return Poll::Ready(Ok(())),
                },
                Phase::Closing | Phase::Closed => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for ExchangeSink {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.check_aborted()?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        match this.phase {
            Phase::Fresh if this.held.is_none() => {
                this.held = Some(Bytes::copy_from_slice(buf));
                Poll::Ready(Ok(buf.len()))
            }
            Phase::Fresh | Phase::Streaming => {
                ready!(this.poll_release(cx))?;
                ready!(this.poll_queued(cx))?;
                this.chunk(Bytes::copy_from_slice(buf))?;
                Poll::Ready(Ok(buf.len()))
            }
            Phase::Closing | Phase::Closed => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already completed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_aborted()?;
        ready!(this.poll_release(cx))?;
        ready!(this.poll_queued(cx))?;
        Pin::new(&mut this.frames).poll_flush(cx).map_err(|_disconnected| closed())
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_queued(cx))?;
            match this.phase {
                Phase::Fresh => {
                    this.check_aborted()?;
                    let length = this.held.as_ref().map_or(0, |bytes| bytes.len() as u64);
                    this.start(Some(length))?;
                }
                Phase::Streaming => match this.held.take() {
                    Some(bytes) => this.chunk(bytes)?,
                    None => {
                        this.queued = Some(ResponseFrame::Eof);
                        this.phase = Phase::Closing;
                    }
                },
                Phase::Closing => {
                    ready!(Pin::new(&mut this.frames).poll_flush(cx)).map_err(|_disconnected| closed())?;
                    this.state.set(RESPONSE_TERMINATED);
                    this.phase = Phase::Closed;
                }
                Phase::Closed => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl Drop for ExchangeSink {
    fn drop(&mut self) {
        if self.phase != Phase::Closed && (self.held.is_some() || self.queued.is_some()) {
            error!("response sink dropped with data that never reached the connection, aborting exchange");
            self.state.set(ABORTED);
        }
    }
}

/// The response body as an `AsyncWrite`.
///
/// Writes are buffered and only reach the response wrappers and the connection on
/// flush, when the buffer fills, or on shutdown. The first bytes to reach the
/// connection start the response, after which status and headers are fixed.
///
/// Completing the body is `shutdown`, or [`shutdown_writes`](Self::shutdown_writes)
/// followed by `flush`. [`close`](Self::close) refuses to run while buffered data is
/// pending. Dropping the channel with pending data aborts the exchange, which severs the
/// connection.
pub struct ResponseChannel {
    inner: StreamSinkChannel,
    buffer: BytesMut,
    writes_shutdown: bool,
    state: Arc<ExchangeState>,
}

impl ResponseChannel {
    pub(crate) fn new(inner: StreamSinkChannel, state: Arc<ExchangeState>) -> Self {
        Self { inner, buffer: BytesMut::new(), writes_shutdown: false, state }
    }

    /// No more writes; the next complete `flush` also completes the body.
    pub fn shutdown_writes(&mut self) {
        self.writes_shutdown = true;
    }

    pub fn has_unflushed_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Closes the channel.
    ///
    /// Fails with [`SendError::UnflushedData`] while buffered data has not been flushed.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.has_unflushed_data() {
            return Err(SendError::UnflushedData.into_io());
        }
        self.writes_shutdown = true;
        self.inner.shutdown().await
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.buffer.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.buffer))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero)));
            }
            self.buffer.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseChannel")
            .field("buffered", &self.buffer.len())
            .field("writes_shutdown", &self.writes_shutdown)
            .finish_non_exhaustive()
    }
}

impl AsyncWrite for ResponseChannel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.writes_shutdown {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "writes have been shut down")));
        }

        if this.buffer.len() + buf.len() > RESPONSE_BUFFER_SIZE {
            ready!(this.poll_drain(cx))?;
            if buf.len() >= RESPONSE_BUFFER_SIZE {
                return Pin::new(&mut this.inner).poll_write(cx, buf);
            }
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if this.writes_shutdown {
            Pin::new(&mut this.inner).poll_shutdown(cx)
        } else {
            Pin::new(&mut this.inner).poll_flush(cx)
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.writes_shutdown = true;
        self.poll_flush(cx)
    }
}

impl Drop for ResponseChannel {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            error!(buffered = self.buffer.len(), "response channel dropped with unflushed data, aborting exchange");
            self.state.set(ABORTED);
        }
    }
}

/// Marks `state` as if the channel was acquired, failing when it already was.
pub(crate) fn acquire(state: &ExchangeState, flag: u16, error: ExchangeError) -> Result<(), ExchangeError> {
    if state.set(flag) { Err(error) } else { Ok(()) }
}
