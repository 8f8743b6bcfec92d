use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame};
use tracing::{info, trace};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

type BodyItem = Result<PayloadItem, ParseError>;

/// The consumer side of a request body.
///
/// Every poll asks the connection for exactly one more payload item through a oneshot
/// channel, so nothing is read from the socket until the handler wants it. That is what
/// lets a `100 Continue` or an early final response go out before the client sends the body.
#[derive(Debug)]
pub struct ReqBody {
    signal: Option<mpsc::Sender<oneshot::Sender<BodyItem>>>,
    receiving: Option<oneshot::Receiver<BodyItem>>,
}

impl ReqBody {
    /// A body that is already at its end.
    pub fn empty() -> Self {
        Self { signal: None, receiving: None }
    }

    /// Creates the consumer/producer pair for one request body read from `payload_stream`.
    pub fn body_channel<S>(payload_stream: &mut S) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (tx, receiver) = mpsc::channel(1);
        let req_body = ReqBody { signal: Some(tx), receiving: None };
        let body_sender = ReqBodySender { payload_stream, receiver, eof: false };
        (req_body, body_sender)
    }

    /// Like [`ReqBody::body_channel`], but a payload framed as empty is handed out as an
    /// already finished body.
    ///
    /// The sender still has to take the decoder's trailing `Eof` off the stream, which
    /// `send_body` does once it sees the consumer is gone.
    pub fn for_payload<S>(payload_size: PayloadSize, payload_stream: &mut S) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (req_body, body_sender) = Self::body_channel(payload_stream);
        if payload_size == PayloadSize::Empty {
            return (ReqBody::empty(), body_sender);
        }
        (req_body, body_sender)
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            if let Some(receiving) = &mut self.receiving {
                let item = ready!(receiving.poll_unpin(cx));
                self.receiving = None;
                return match item {
                    Ok(Ok(PayloadItem::Chunk(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(Ok(PayloadItem::Eof)) => {
                        self.signal = None;
                        Poll::Ready(None)
                    }
                    Ok(Err(e)) => {
                        self.signal = None;
                        Poll::Ready(Some(Err(e)))
                    }
                    Err(_canceled) => {
                        self.signal = None;
                        Poll::Ready(Some(Err(ParseError::invalid_body("request body is no longer available"))))
                    }
                };
            }

            let Some(signal) = &mut self.signal else {
                return Poll::Ready(None);
            };

            let sent = match ready!(signal.poll_ready_unpin(cx)) {
                Ok(()) => {
                    let (tx, rx) = oneshot::channel();
                    signal.start_send(tx).map(|()| rx)
                }
                Err(e) => Err(e),
            };

            match sent {
                Ok(rx) => self.receiving = Some(rx),
                Err(e) => {
                    self.signal = None;
                    return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.signal.is_none() && self.receiving.is_none()
    }
}

/// The producer side: answers each request of the [`ReqBody`] with one item from the
/// connection's decoded stream.
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: mpsc::Receiver<oneshot::Sender<BodyItem>>,
    eof: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Whether the whole body has been read off the connection.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Serves body requests until the body ends or fails.
    ///
    /// When the consumer goes away first, the rest of the body is discarded here.
    /// A failure is delivered to the waiting consumer and also returned.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            let Some(sender) = self.receiver.next().await else {
                return self.skip_body().await;
            };

            let item = match self.payload_stream.next().await {
                Some(Ok(Message::Payload(payload_item))) => payload_item,
                Some(Ok(Message::Header(_))) => {
                    let e = ParseError::invalid_body("received header from receive body phase");
                    let _ = sender.send(Err(e.replicate()));
                    return Err(e);
                }
                Some(Err(e)) => {
                    let _ = sender.send(Err(e.replicate()));
                    return Err(e);
                }
                None => {
                    let e = ParseError::invalid_body("connection closed before the request body ended");
                    let _ = sender.send(Err(e.replicate()));
                    return Err(e);
                }
            };

            self.eof = item.is_eof();
            if sender.send(Ok(item)).is_err() {
                trace!("request body consumer went away");
            }
        }
        Ok(())
    }

    /// Reads and drops whatever is left of the body so the next request head starts
    /// at the right byte.
    pub async fn skip_body(&mut self) -> Result<(), ParseError> {
        let mut size: usize = 0;
        while !self.eof {
            match self.payload_stream.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => size += bytes.len(),
                Some(Ok(Message::Payload(PayloadItem::Eof))) => self.eof = true,
                Some(Ok(Message::Header(_))) => {
                    return Err(ParseError::invalid_body("received header while discarding request body"));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(ParseError::invalid_body("connection closed while discarding request body")),
            }
        }

        if size > 0 {
            info!(size = size, "skip request body");
        }
        Ok(())
    }
}
