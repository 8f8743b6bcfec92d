//! `Transfer-Encoding: chunked` request bodies.
//!
//! Chunk extensions and trailer fields are read and dropped. The sum of all chunk sizes
//! is checked against the entity limit as soon as each size line is parsed, before any
//! of that chunk's data is handed out. The trailer section as a whole is held to the
//! header size limit.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::options::DEFAULT_MAX_HEADER_SIZE;
use crate::protocol::{ParseError, PayloadItem};

/// Longest size line or trailer line accepted.
const MAX_LINE_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SizeLine,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    received: u64,
    max_entity_size: u64,
    trailer_size: usize,
    max_trailer_size: usize,
}

impl ChunkedDecoder {
    pub fn new(max_entity_size: u64) -> Self {
        Self { state: State::SizeLine, received: 0, max_entity_size, trailer_size: 0, max_trailer_size: DEFAULT_MAX_HEADER_SIZE }
    }

    pub fn with_max_trailer_size(mut self, max_trailer_size: usize) -> Self {
        self.max_trailer_size = max_trailer_size;
        self
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::SizeLine => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    self.received = self.received.checked_add(size).ok_or_else(|| ParseError::too_large_entity(self.max_entity_size))?;
                    ensure!(self.received <= self.max_entity_size, ParseError::too_large_entity(self.max_entity_size));
                    trace!(size, "chunk size line");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }
                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = remaining.min(src.len() as u64);
                    let bytes = src.split_to(len as usize).freeze();
                    self.state = if len == remaining { State::DataEnd } else { State::Data(remaining - len) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("chunk data is not followed by CRLF"));
                    src.advance(2);
                    self.state = State::SizeLine;
                }
                State::Trailer => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    self.trailer_size += line.len() + 2;
                    ensure!(
                        self.trailer_size <= self.max_trailer_size,
                        ParseError::too_large_header(self.trailer_size, self.max_trailer_size)
                    );
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

/// Splits off one CRLF terminated line, without the terminator.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            ensure!(end <= MAX_LINE_SIZE, ParseError::invalid_body("chunk line too long"));
            let line = src.split_to(end);
            src.advance(2);
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_SIZE, ParseError::invalid_body("chunk line too long"));
            Ok(None)
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    ensure!(!digits.is_empty(), ParseError::invalid_body("missing chunk size"));

    digits.iter().try_fold(0u64, |size, b| {
        let digit = (*b as char).to_digit(16).ok_or_else(|| ParseError::invalid_body("invalid chunk size"))?;
        size.checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use indoc::indoc;

    fn decode_all(decoder: &mut ChunkedDecoder, src: &mut BytesMut) -> Result<Vec<PayloadItem>, ParseError> {
        let mut items = Vec::new();
        while let Some(item) = decoder.decode(src)? {
            let eof = item.is_eof();
            items.push(item);
            if eof {
                break;
            }
        }
        Ok(items)
    }

    #[test]
    fn decodes_chunks_with_extension_and_trailer() {
        let body = indoc! {"
        5;name=value\r
        hello\r
        6\r
         world\r
        0\r
        X-Trailer: yes\r
        \r
        "};
        let mut src = BytesMut::from(body);
        let items = decode_all(&mut ChunkedDecoder::new(1024), &mut src).unwrap();

        assert_eq!(
            items,
            vec![
                PayloadItem::Chunk(Bytes::from_static(b"hello")),
                PayloadItem::Chunk(Bytes::from_static(b" world")),
                PayloadItem::Eof
            ]
        );
        assert!(src.is_empty());
    }

    #[test]
    fn waits_for_split_input() {
        let mut decoder = ChunkedDecoder::new(1024);
        let mut src = BytesMut::from("A\r\n01234");

        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"01234"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"56789\r");
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"56789"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"\n0\r\n\r\n");
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Eof));
    }

    #[test]
    fn entity_limit_checked_at_size_line() {
        let mut src = BytesMut::from("6\r\nabcdef\r\n6\r\nghijkl\r\n0\r\n\r\n");
        let mut decoder = ChunkedDecoder::new(10);

        assert!(decoder.decode(&mut src).unwrap().is_some());
        assert!(matches!(decoder.decode(&mut src), Err(ParseError::TooLargeEntity { max_size: 10 })));
    }

    #[test]
    fn malformed_input() {
        assert!(ChunkedDecoder::new(10).decode(&mut BytesMut::from("zz\r\n")).is_err());
        assert!(ChunkedDecoder::new(u64::MAX).decode(&mut BytesMut::from("fffffffffffffffff\r\n")).is_err());

        let mut missing_crlf = BytesMut::from("1\r\naXX");
        let mut decoder = ChunkedDecoder::new(10);
        assert!(decoder.decode(&mut missing_crlf).unwrap().is_some());
        assert!(decoder.decode(&mut missing_crlf).is_err());
    }

    #[test]
    fn trailer_section_is_bounded() {
        let trailers = "X-Filler: aaaaaaaaaaaaaaaaaaaa\r\n".repeat(4);
        let mut src = BytesMut::from(format!("0\r\n{trailers}\r\n").as_str());
        let result = decode_all(&mut ChunkedDecoder::new(1024).with_max_trailer_size(64), &mut src);
        assert!(matches!(result, Err(ParseError::TooLargeHeader { max_size: 64, .. })));

        let mut src = BytesMut::from(format!("0\r\n{trailers}\r\n").as_str());
        let items = decode_all(&mut ChunkedDecoder::new(1024).with_max_trailer_size(1024), &mut src).unwrap();
        assert_eq!(items, vec![PayloadItem::Eof]);
    }
}
