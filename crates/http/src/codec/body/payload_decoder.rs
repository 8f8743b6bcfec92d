use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Decodes one request body according to its framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    NoBody,
}

impl PayloadDecoder {
    /// Refuses a declared length above `max_entity_size` up front; chunked bodies are
    /// checked as their size lines arrive, and their trailers against `max_header_size`.
    pub fn new(payload_size: PayloadSize, max_header_size: usize, max_entity_size: u64) -> Result<Self, ParseError> {
        match payload_size {
            PayloadSize::Length(n) if n > max_entity_size => Err(ParseError::too_large_entity(max_entity_size)),
            PayloadSize::Length(n) => Ok(Self::Length(LengthDecoder::new(n))),
            PayloadSize::Chunked => Ok(Self::Chunked(ChunkedDecoder::new(max_entity_size).with_max_trailer_size(max_header_size))),
            PayloadSize::Empty => Ok(Self::NoBody),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Length(decoder) => decoder.decode(src),
            Self::Chunked(decoder) => decoder.decode(src),
            Self::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
