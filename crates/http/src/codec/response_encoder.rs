//! Streaming response encoding: a head, its payload items, then the next head.

use std::io;
use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};

/// Encodes response heads and bodies. An informational (`1xx`) head carries no
/// body and leaves the encoder ready for the final head.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Forgets the body announced by the last head, as for a response to `HEAD`.
    pub fn discard_payload(&mut self) {
        self.payload_encoder = None;
    }

    /// A final head was encoded and its body has not ended yet.
    pub fn is_in_payload(&self) -> bool {
        self.payload_encoder.is_some()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                if !head.status().is_informational() {
                    self.payload_encoder = Some(payload_size.into());
                }
                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let is_eof = payload_item.is_eof();
                let result = payload_encoder.encode(payload_item, dst);
                if is_eof {
                    self.payload_encoder = None;
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PayloadItem, build_head, continue_head};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    type Item = Message<(ResponseHead, PayloadSize), Bytes>;

    #[test]
    fn continue_then_final_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Item::Header((continue_head(), PayloadSize::Empty)), &mut dst).unwrap();
        encoder.encode(Item::Header((build_head(StatusCode::OK, HeaderMap::new()), PayloadSize::Length(2))), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok");
    }

    #[test]
    fn payload_without_head_is_refused() {
        let mut encoder = ResponseEncoder::new();
        let result = encoder.encode(Item::Payload(PayloadItem::Eof), &mut BytesMut::new());
        assert!(result.is_err());
    }

    #[test]
    fn head_response_skips_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Item::Header((build_head(StatusCode::OK, HeaderMap::new()), PayloadSize::Chunked)), &mut dst).unwrap();
        encoder.discard_payload();
        encoder.encode(Item::Header((build_head(StatusCode::OK, HeaderMap::new()), PayloadSize::Empty)), &mut dst).unwrap();
        assert!(dst.ends_with(b"content-length: 0\r\n\r\n"));
    }
}
