//! The read/write loop of one accepted connection.
//!
//! [`HttpConnection`] splits its work in two halves that run concurrently:
//!
//! - the reader parses request heads, creates one exchange per head, dispatches it
//!   on a tokio task and streams the request body to it on demand
//! - the writer takes one response slot per exchange, in request order, and encodes
//!   what the exchange produces onto the socket
//!
//! Responses are never reordered. Limits and timeouts come from the connection's
//! [`OptionMap`]: [`MAX_HEADER_SIZE`], [`MAX_ENTITY_SIZE`], [`IDLE_TIMEOUT`],
//! [`BUFFER_PIPELINED_DATA`] and [`ALWAYS_SET_DATE`].

mod idle;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio_util::codec::FramedRead;
use tracing::{error, trace};

use crate::codec::RequestDecoder;
use crate::handler::HttpHandler;
use crate::options::{
    ALWAYS_SET_DATE, BUFFER_PIPELINED_DATA, DEFAULT_MAX_ENTITY_SIZE, DEFAULT_MAX_HEADER_SIZE, IDLE_TIMEOUT, MAX_ENTITY_SIZE,
    MAX_HEADER_SIZE, OptionMap,
};
use crate::protocol::HttpError;
use idle::IdleTimeout;
use reader::{RequestReader, read_requests};
use writer::{MessageWriter, write_responses};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Responses queued ahead of the one being written.
const PIPELINE_DEPTH: usize = 16;

/// One HTTP/1.1 connection over a pair of byte streams.
///
/// ```no_run
/// use std::sync::Arc;
/// use conduit_http::connection::HttpConnection;
/// use conduit_http::handler::ResponseCodeHandler;
/// use tokio::net::TcpListener;
///
/// # async fn serve() -> std::io::Result<()> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let handler = Arc::new(ResponseCodeHandler::OK);
/// loop {
///     let (stream, _) = listener.accept().await?;
///     let handler = Arc::clone(&handler);
///     tokio::spawn(async move {
///         let (reader, writer) = stream.into_split();
///         let _ = HttpConnection::new(reader, writer).process(handler).await;
///     });
/// }
/// # }
/// ```
pub struct HttpConnection<R, W> {
    framed_read: RequestReader<R>,
    writer: MessageWriter<W>,
    options: OptionMap,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_options(reader, writer, OptionMap::empty())
    }

    pub fn with_options(reader: R, writer: W, options: OptionMap) -> Self {
        let decoder = RequestDecoder::with_limits(
            options.get_or(&MAX_HEADER_SIZE, DEFAULT_MAX_HEADER_SIZE),
            options.get_or(&MAX_ENTITY_SIZE, DEFAULT_MAX_ENTITY_SIZE),
        );
        let idle_timeout = options.get(&IDLE_TIMEOUT).map(|millis| Duration::from_millis(*millis));

        Self {
            framed_read: FramedRead::with_capacity(IdleTimeout::new(reader, idle_timeout), decoder, READ_BUFFER_SIZE),
            writer: MessageWriter::with_capacity(writer, WRITE_BUFFER_SIZE),
            options,
        }
    }

    /// Serves requests with `handler` until either side closes the connection.
    ///
    /// Returns the error that ended the connection, if any: a request that could not be
    /// read (it was answered with a `4xx` first) or a response that could not be written.
    pub async fn process<H>(self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: HttpHandler + ?Sized + 'static,
    {
        let Self { mut framed_read, mut writer, options } = self;
        let pipelined = options.get_or(&BUFFER_PIPELINED_DATA, false);
        let set_date = options.get_or(&ALWAYS_SET_DATE, true);
        let (mut slot_tx, mut slot_rx) = mpsc::channel(PIPELINE_DEPTH);

        let reading = async {
            let result = read_requests(&mut framed_read, &mut slot_tx, &handler, &options, pipelined).await;
            // no more slots: the writer ends after the queued ones
            slot_tx.close_channel();
            result
        };
        let writing = write_responses(&mut writer, &mut slot_rx, pipelined, set_date);
        tokio::pin!(reading, writing);

        let mut read_result = None;
        loop {
            select! {
                result = &mut reading, if read_result.is_none() => {
                    read_result = Some(result);
                }
                result = &mut writing => {
                    if let Err(e) = &result {
                        error!(cause = %e, "response could not be written, connection shutdown");
                    }
                    result?;
                    break;
                }
            }
        }

        trace!("connection finished");
        match read_result {
            Some(Err(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl<R, W> std::fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection").field("options", &self.options).finish_non_exhaustive()
    }
}
