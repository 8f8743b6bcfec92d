//! Streaming request decoding: a head, then that request's payload items, then the
//! next head.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::options::DEFAULT_MAX_ENTITY_SIZE;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes a stream of pipelined requests.
///
/// While `payload_decoder` is `Some` the decoder is inside a request body and yields
/// [`Message::Payload`] items, ending with [`PayloadItem::Eof`]. Otherwise it waits for
/// the next head.
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    max_entity_size: u64,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(max_header_size: usize, max_entity_size: u64) -> Self {
        Self { header_decoder: HeaderDecoder::new(max_header_size), payload_decoder: None, max_entity_size }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder::default(), payload_decoder: None, max_entity_size: DEFAULT_MAX_ENTITY_SIZE }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            if matches!(item, Some(PayloadItem::Eof)) {
                self.payload_decoder = None;
            }
            return Ok(item.map(Message::Payload));
        }

        let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
            return Ok(None);
        };
        self.payload_decoder = Some(PayloadDecoder::new(payload_size, self.header_decoder.max_header_size(), self.max_entity_size)?);
        Ok(Some(Message::Header((header, payload_size))))
    }
}
