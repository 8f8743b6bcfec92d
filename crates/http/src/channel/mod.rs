//! Channel decoration.
//!
//! A [`FunctionChannel`] wraps one inner reader or writer and runs an ordered list of
//! [`ChannelFunction`]s around every I/O call. It never changes readiness: a pending
//! inner call is a pending outer call, and functions only run once the inner call
//! completes. Wrapped channels nest, so a `FunctionChannel` can decorate another one.
//!
//! Handlers decorate the body channels of an exchange by registering a
//! [`ChannelWrapper`]; the wrappers run when the channel is acquired.

mod functions;

pub use functions::{ByteCount, ByteCounter, Masker, Utf8Checker};

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::exchange::HttpServerExchange;

/// The request body as a handler sees it, after every registered wrapper.
pub type StreamSourceChannel = Box<dyn AsyncRead + Send + Unpin>;

/// The response body as a handler sees it, after every registered wrapper.
pub type StreamSinkChannel = Box<dyn AsyncWrite + Send + Unpin>;

/// A hook invoked by a [`FunctionChannel`].
///
/// Every method has a no-op default. Slices are only valid for the duration of the call.
/// An error fails the I/O call that triggered it.
pub trait ChannelFunction: Send {
    /// Called once per completed read with the bytes that read produced, an empty
    /// slice meaning end of stream. The bytes may be rewritten in place.
    fn after_read(&mut self, _data: &mut [u8]) -> io::Result<()> {
        Ok(())
    }

    /// Called once per logical write, before the inner channel sees the bytes.
    fn before_write(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    /// Called with the prefix of the write the inner channel accepted.
    fn after_write(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    /// Called once, when the channel reached end of stream or was shut down.
    fn complete(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pin_project! {
    pub struct FunctionChannel<C> {
        #[pin]
        inner: C,
        functions: Vec<Box<dyn ChannelFunction>>,
        write_pending: bool,
        completed: bool,
    }
}

impl<C> FunctionChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner, functions: Vec::new(), write_pending: false, completed: false }
    }

    pub fn with_function<F: ChannelFunction + 'static>(mut self, function: F) -> Self {
        self.functions.push(Box::new(function));
        self
    }

    pub fn push_function(&mut self, function: Box<dyn ChannelFunction>) {
        self.functions.push(function);
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

fn complete_all(functions: &mut [Box<dyn ChannelFunction>], completed: &mut bool) -> io::Result<()> {
    if *completed {
        return Ok(());
    }
    *completed = true;
    functions.iter_mut().try_for_each(|function| function.complete())
}

impl<C: AsyncRead> AsyncRead for FunctionChannel<C> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let filled = buf.filled().len();
        let wanted = buf.remaining() > 0;

        ready!(this.inner.poll_read(cx, buf))?;

        let data = &mut buf.filled_mut()[filled..];
        let eof = wanted && data.is_empty();
        for function in this.functions.iter_mut() {
            function.after_read(data)?;
        }
        if eof {
            complete_all(this.functions, this.completed)?;
        }
        Poll::Ready(Ok(()))
    }
}

impl<C: AsyncWrite> AsyncWrite for FunctionChannel<C> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();

        // a write retried after Pending is the same logical write
        if !*this.write_pending {
            for function in this.functions.iter_mut() {
                function.before_write(buf)?;
            }
            *this.write_pending = true;
        }

        let written = ready!(this.inner.poll_write(cx, buf));
        *this.write_pending = false;
        let written = written?;

        for function in this.functions.iter_mut() {
            function.after_write(&buf[..written])?;
        }
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        ready!(this.inner.poll_shutdown(cx))?;
        Poll::Ready(complete_all(this.functions, this.completed))
    }
}

/// Decorates a body channel of an exchange when it is acquired.
///
/// The response has not started when a response wrapper runs, so it may still adjust
/// the response headers to match what it does to the body.
pub trait ChannelWrapper<C>: Send + Sync {
    fn wrap(&self, channel: C, exchange: &mut HttpServerExchange) -> C;
}

impl<C, F> ChannelWrapper<C> for F
where
    F: Fn(C, &mut HttpServerExchange) -> C + Send + Sync,
{
    fn wrap(&self, channel: C, exchange: &mut HttpServerExchange) -> C {
        self(channel, exchange)
    }
}
