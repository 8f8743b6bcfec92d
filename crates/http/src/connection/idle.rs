use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep, sleep_until};

use crate::protocol::ParseError;

pin_project! {
    /// Fails a read that waits longer than `timeout` for bytes.
    ///
    /// The clock starts when a read first returns `Pending` and stops when any read
    /// completes, so time spent while nobody reads, such as while a handler runs, does not count.
    /// The error is an `io::Error` of kind `TimedOut` carrying [`ParseError::Timeout`].
    pub(crate) struct IdleTimeout<R> {
        #[pin]
        inner: R,
        timeout: Option<Duration>,
        sleep: Option<Pin<Box<Sleep>>>,
    }
}

impl<R> IdleTimeout<R> {
    pub(crate) fn new(inner: R, timeout: Option<Duration>) -> Self {
        Self { inner, timeout, sleep: None }
    }
}

impl<R: AsyncRead> AsyncRead for IdleTimeout<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Poll::Ready(result) = this.inner.poll_read(cx, buf) {
            *this.sleep = None;
            return Poll::Ready(result);
        }

        let Some(timeout) = *this.timeout else {
            return Poll::Pending;
        };
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep_until(Instant::now() + timeout)));
        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                *this.sleep = None;
                Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, ParseError::Timeout(timeout))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = IdleTimeout::new(server, Some(Duration::from_millis(50)));

        let e = reader.read(&mut [0u8; 8]).await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);
        assert!(matches!(ParseError::from(e), ParseError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn bytes_restart_the_clock() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = IdleTimeout::new(server, Some(Duration::from_millis(50)));

        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                client.write_all(b"x").await.unwrap();
            }
        });

        let mut buf = [0u8; 1];
        for _ in 0..3 {
            assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn no_timeout_configured() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = IdleTimeout::new(server, None);
        client.write_all(b"ok").await.unwrap();
        drop(client);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "ok");
    }
}
