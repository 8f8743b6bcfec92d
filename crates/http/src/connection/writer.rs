use bytes::{Bytes, BytesMut};
use futures::{FutureExt, StreamExt};
use futures::channel::mpsc;
use http::header::{CONNECTION, DATE};
use http::{HeaderValue, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::{error, trace};

use crate::codec::ResponseEncoder;
use crate::date::http_date;
use crate::exchange::{ABORTED, NON_PERSISTENT, RESPONSE_TERMINATED, ResponseFrame, ResponseSlot};
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError, continue_head, has_token};

/// Encoded bytes held back before a write is forced, even if more frames are ready.
const FLUSH_THRESHOLD: usize = 64 * 1024;

type OutMessage = Message<(ResponseHead, PayloadSize), Bytes>;

/// Encodes responses into a buffer and writes it out on [`flush`](Self::flush).
#[derive(Debug)]
pub(crate) struct MessageWriter<W> {
    writer: W,
    buffer: BytesMut,
    encoder: ResponseEncoder,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn with_capacity(writer: W, buffer_size: usize) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(buffer_size), encoder: ResponseEncoder::new() }
    }

    fn write(&mut self, item: OutMessage) -> Result<(), SendError> {
        self.encoder.encode(item, &mut self.buffer)
    }

    async fn flush(&mut self) -> Result<(), SendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buffer).await?;
        self.buffer.clear();
        Ok(self.writer.flush().await?)
    }

    async fn flush_if_full(&mut self) -> Result<(), SendError> {
        if self.buffer.len() >= FLUSH_THRESHOLD { self.flush().await } else { Ok(()) }
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), SendError> {
        self.flush().await?;
        Ok(self.writer.shutdown().await?)
    }
}

/// Writes the response of every slot, in the order the slots were queued, until the
/// queue ends or a response closes the connection.
///
/// With `coalesce` bytes are only flushed when nothing else is ready to be written;
/// otherwise every response is flushed as soon as it is complete.
pub(crate) async fn write_responses<W>(
    writer: &mut MessageWriter<W>,
    slots: &mut mpsc::Receiver<ResponseSlot>,
    coalesce: bool,
    set_date: bool,
) -> Result<(), SendError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(slot) = next_ready(writer, slots).await? {
        let keep_alive = write_response(writer, slot, set_date).await?;
        if !keep_alive {
            trace!("response closes the connection");
            break;
        }
        if !coalesce {
            writer.flush().await?;
        }
    }
    writer.shutdown().await
}

/// The next item of `receiver`, flushing pending bytes first if it would have to wait.
async fn next_ready<W, T>(writer: &mut MessageWriter<W>, receiver: &mut mpsc::Receiver<T>) -> Result<Option<T>, SendError>
where
    W: AsyncWrite + Unpin,
{
    if let Some(item) = receiver.next().now_or_never() {
        return Ok(item);
    }
    writer.flush().await?;
    Ok(receiver.next().await)
}

/// Writes one response and reports whether the connection stays open after it.
async fn write_response<W>(writer: &mut MessageWriter<W>, mut slot: ResponseSlot, set_date: bool) -> Result<bool, SendError>
where
    W: AsyncWrite + Unpin,
{
    let mut started = false;
    let mut keep_alive = false;

    // the exchange may go away without an end of body frame: that ends the response too
    while let Some(frame) = next_ready(writer, &mut slot.frames).await? {
        match frame {
            ResponseFrame::Continue => {
                if !started {
                    writer.write(Message::Header((continue_head(), PayloadSize::Empty)))?;
                    writer.flush().await?;
                }
            }
            ResponseFrame::Head(head, payload_size) => {
                keep_alive = write_head(writer, &slot, head, payload_size, set_date)?;
                started = true;
            }
            ResponseFrame::Chunk(bytes) => {
                if writer.encoder.is_in_payload() {
                    writer.write(Message::Payload(PayloadItem::Chunk(bytes)))?;
                    writer.flush_if_full().await?;
                }
            }
            ResponseFrame::Eof => break,
        }
    }

    if slot.state.is_set(ABORTED) {
        error!("exchange aborted after its response started, severing connection");
        writer.flush().await?;
        return Err(SendError::aborted("the response could not be completed"));
    }

    if !started {
        let (head, payload_size) = slot.state.start_response(Some(0)).map_err(SendError::invalid_body)?;
        keep_alive = write_head(writer, &slot, head, payload_size, set_date)?;
    }

    // a response short of its declared length fails here
    if writer.encoder.is_in_payload() {
        writer.write(Message::Payload(PayloadItem::Eof))?;
    }

    slot.state.set(RESPONSE_TERMINATED);
    keep_alive &= !slot.state.is_set(NON_PERSISTENT);
    if let Some(done) = slot.done.take() {
        let _ = done.send(keep_alive);
    }
    Ok(keep_alive)
}

fn write_head<W>(
    writer: &mut MessageWriter<W>,
    slot: &ResponseSlot,
    mut head: ResponseHead,
    payload_size: PayloadSize,
    set_date: bool,
) -> Result<bool, SendError>
where
    W: AsyncWrite + Unpin,
{
    let closing = head.headers().get_all(CONNECTION).iter().any(|value| has_token(value, "close"));
    let keep_alive = slot.persistent && !closing && !slot.state.is_set(NON_PERSISTENT);

    let headers = head.headers_mut();
    if !keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    } else if slot.version == Version::HTTP_10 {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
    if set_date
        && !headers.contains_key(DATE)
        && let Some(date) = http_date()
    {
        headers.insert(DATE, date);
    }

    writer.write(Message::Header((head, payload_size)))?;
    if slot.head_request {
        writer.encoder.discard_payload();
    }
    Ok(keep_alive)
}
