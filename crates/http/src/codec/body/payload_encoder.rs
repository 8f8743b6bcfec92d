use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Encodes one response body according to the framing announced in its head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    NoBody,
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => Self::Length(LengthEncoder::new(n)),
            PayloadSize::Chunked => Self::Chunked(ChunkedEncoder::new()),
            PayloadSize::Empty => Self::NoBody,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::Length(encoder) => encoder.encode(item, dst),
            Self::Chunked(encoder) => encoder.encode(item, dst),
            Self::NoBody => match item {
                PayloadItem::Chunk(bytes) if bytes.has_remaining() => {
                    Err(SendError::invalid_body("response announced no body but data was written"))
                }
                PayloadItem::Chunk(_) | PayloadItem::Eof => Ok(()),
            },
        }
    }
}
