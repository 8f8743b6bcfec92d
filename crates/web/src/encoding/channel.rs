use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes};
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;

use super::encoder::Encoder;

pin_project! {
    /// A response channel that compresses everything written to it.
    ///
    /// Compressed bytes reach the inner channel lazily: a write only compresses, and the
    /// output is moved on by the next write, a flush or the shutdown that ends the stream.
    #[derive(Debug)]
    pub struct EncodedChannel<W> {
        #[pin]
        inner: W,
        encoder: Option<Encoder>,
        pending: Bytes,
    }
}

impl<W: AsyncWrite> EncodedChannel<W> {
    pub(crate) fn new(inner: W, encoder: Encoder) -> Self {
        Self { inner, encoder: Some(encoder), pending: Bytes::new() }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

fn poll_drain<W: AsyncWrite>(mut inner: Pin<&mut W>, pending: &mut Bytes, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    while !pending.is_empty() {
        let n = ready!(inner.as_mut().poll_write(cx, &pending[..]))?;
        if n == 0 {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero)));
        }
        pending.advance(n);
    }
    Poll::Ready(Ok(()))
}

impl<W: AsyncWrite> AsyncWrite for EncodedChannel<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        ready!(poll_drain(this.inner, this.pending, cx))?;

        let Some(encoder) = this.encoder.as_mut() else {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "encoded stream already finished")));
        };
        encoder.write(buf)?;
        *this.pending = encoder.take();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        if let Some(encoder) = this.encoder.take() {
            *this.pending = encoder.finish()?;
            ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        }
        this.inner.poll_shutdown(cx)
    }
}
