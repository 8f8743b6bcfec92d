use std::sync::Arc;

use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{info, trace, warn};

use super::idle::IdleTimeout;
use crate::codec::RequestDecoder;
use crate::exchange::{HttpServerExchange, NON_PERSISTENT, ResponseSlot};
use crate::handler::{HttpHandler, dispatch};
use crate::options::OptionMap;
use crate::protocol::body::ReqBody;
use crate::protocol::{Message, ParseError};

pub(crate) type RequestReader<R> = FramedRead<IdleTimeout<R>, RequestDecoder>;

/// Reads request heads, turns each into an exchange and dispatches it on its own task.
///
/// The response slot of an exchange is queued before its handler starts, so the writer
/// sees slots in request order no matter which handler finishes first. The body of a
/// request is served to its handler from here and whatever it leaves is discarded
/// before the next head is read. Unless `pipelined`, the next head is only read once
/// the previous response has been written.
pub(crate) async fn read_requests<R, H>(
    framed_read: &mut RequestReader<R>,
    slots: &mut mpsc::Sender<ResponseSlot>,
    handler: &Arc<H>,
    options: &OptionMap,
    pipelined: bool,
) -> Result<(), ParseError>
where
    R: AsyncRead + Unpin,
    H: HttpHandler + ?Sized + 'static,
{
    loop {
        let (header, payload_size) = match framed_read.next().await {
            Some(Ok(Message::Header(head))) => head,
            Some(Ok(Message::Payload(_))) => {
                let e = ParseError::invalid_body("expect request header but receive body");
                return Err(reject(slots, e).await);
            }
            Some(Err(ParseError::Timeout(timeout))) if framed_read.read_buffer().is_empty() => {
                info!(?timeout, "connection idle, closing");
                return Ok(());
            }
            Some(Err(e)) => return Err(reject(slots, e).await),
            None => {
                trace!("peer closed the connection");
                return Ok(());
            }
        };

        let (body, mut body_sender) = ReqBody::for_payload(payload_size, framed_read);
        let (mut exchange, mut slot) = HttpServerExchange::new(header, payload_size, body, options.clone());
        let state = Arc::clone(&slot.state);
        let persistent = slot.persistent;
        let (done_tx, done_rx) = oneshot::channel();
        slot.done = Some(done_tx);

        if slots.send(slot).await.is_err() {
            trace!("response writer has stopped, no more requests are read");
            return Ok(());
        }

        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            dispatch(handler.as_ref(), &mut exchange).await;
        });

        if let Err(e) = body_sender.send_body().await {
            warn!(cause = %e, "request body could not be read, closing connection after this response");
            state.set(NON_PERSISTENT);
            return Err(e);
        }

        if !persistent {
            return Ok(());
        }
        if !pipelined && !matches!(done_rx.await, Ok(true)) {
            return Ok(());
        }
    }
}

/// Queues a bodyless response for a request that could not be read, returning the cause.
async fn reject(slots: &mut mpsc::Sender<ResponseSlot>, e: ParseError) -> ParseError {
    warn!(cause = %e, status = %e.status_code(), "can't read the next request, closing connection");
    let _ = slots.send(ResponseSlot::reject(e.status_code())).await;
    e
}
