//! Request body streaming between the connection and a handler.
//!
//! [`ReqBody`] is what the exchange reads from; [`ReqBodySender`] runs on the connection,
//! next to the dispatched handler, and pulls decoded payload items off the socket only
//! when the body asks for one. Whatever the handler leaves unread is discarded by the
//! sender before the next request head is parsed.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use http_body_util::BodyExt;

    type Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>;

    fn chunk(s: &'static str) -> Item {
        Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(s.as_bytes()))))
    }

    #[tokio::test]
    async fn streams_chunks_on_demand() {
        let mut payload = stream::iter(vec![chunk("hello "), chunk("world"), Ok(Message::Payload(PayloadItem::Eof))]);
        let (body, mut sender) = ReqBody::body_channel(&mut payload);

        let (sent, collected) = tokio::join!(sender.send_body(), body.collect());

        assert!(sent.is_ok());
        assert!(sender.is_eof());
        assert_eq!(collected.unwrap().to_bytes(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn consumer_sees_decode_error() {
        let mut payload = stream::iter(vec![chunk("ab"), Err(ParseError::too_large_entity(2))]);
        let (body, mut sender) = ReqBody::body_channel(&mut payload);

        let (sent, collected) = tokio::join!(sender.send_body(), body.collect());

        assert!(matches!(sent, Err(ParseError::TooLargeEntity { max_size: 2 })));
        assert!(matches!(collected, Err(ParseError::TooLargeEntity { max_size: 2 })));
    }

    #[tokio::test]
    async fn dropped_consumer_discards_rest() {
        let mut payload = stream::iter(vec![chunk("unread"), Ok(Message::Payload(PayloadItem::Eof))]);
        let (body, mut sender) = ReqBody::body_channel(&mut payload);
        drop(body);

        assert!(sender.send_body().await.is_ok());
        assert!(sender.is_eof());
    }

    #[tokio::test]
    async fn empty_payload_consumes_trailing_eof() {
        let next_head = RequestHeader::from(http::Request::builder().uri("/next").body(()).unwrap());
        let mut payload = stream::iter(vec![Ok(Message::Payload(PayloadItem::Eof)), Ok(Message::Header((next_head, PayloadSize::Empty)))]);
        let (mut body, mut sender) = ReqBody::for_payload(PayloadSize::Empty, &mut payload);

        assert!(body.frame().await.is_none());
        assert!(!sender.is_eof());
        assert!(sender.send_body().await.is_ok());
        assert!(sender.is_eof());

        let Some(Ok(Message::Header((header, _)))) = payload.next().await else {
            panic!("the next head should follow the empty body");
        };
        assert_eq!(header.path(), "/next");
    }
}
