//! Request head decoding.
//!
//! `httparse` does the tokenizing. Header names and values are then sliced out of the
//! frozen head bytes rather than copied, by recording where each one sits in the buffer.
//!
//! Limits: at most [`MAX_HEADER_NUM`] header fields, and the whole head (request line,
//! fields and the terminating blank line) may not exceed the configured header size.

use std::mem::MaybeUninit;
use std::ops::Range;

use bytes::BytesMut;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::options::DEFAULT_MAX_HEADER_SIZE;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of header fields in one request head.
pub const MAX_HEADER_NUM: usize = 64;

/// Decodes one request head and works out how its payload is framed.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_size: usize,
}

impl HeaderDecoder {
    pub fn new(max_header_size: usize) -> Self {
        Self { max_header_size }
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_SIZE)
    }
}

#[derive(Clone)]
struct FieldSpan {
    name: Range<usize>,
    value: Range<usize>,
}

const EMPTY_SPAN: FieldSpan = FieldSpan { name: 0..0, value: 0..0 };

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut fields = [const { MaybeUninit::<httparse::Header<'_>>::uninit() }; MAX_HEADER_NUM];
        let mut spans = [EMPTY_SPAN; MAX_HEADER_NUM];

        let mut req = httparse::Request::new(&mut []);
        let status = req.parse_with_uninit_headers(src, &mut fields).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        let head_len = match status {
            Status::Complete(head_len) => head_len,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_size, ParseError::too_large_header(src.len(), self.max_header_size));
                return Ok(None);
            }
        };
        trace!(head_len, "parsed request head");
        ensure!(head_len <= self.max_header_size, ParseError::too_large_header(head_len, self.max_header_size));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            other => return Err(ParseError::InvalidVersion(other)),
        };
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_invalid| ParseError::InvalidMethod)?;
        let uri = Uri::try_from(req.path.ok_or(ParseError::InvalidUri)?).map_err(|_invalid| ParseError::InvalidUri)?;

        let base = src.as_ptr() as usize;
        let field_count = req.headers.len();
        for (field, span) in req.headers.iter().zip(spans.iter_mut()) {
            let name_start = field.name.as_ptr() as usize - base;
            let value_start = field.value.as_ptr() as usize - base;
            span.name = name_start..name_start + field.name.len();
            span.value = value_start..value_start + field.value.len();
        }

        let head = src.split_to(head_len).freeze();
        let mut headers = HeaderMap::with_capacity(field_count);
        for span in &spans[..field_count] {
            let name = HeaderName::from_bytes(&head[span.name.clone()]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head.slice(span.value.clone())).map_err(ParseError::invalid_header)?;
            headers.append(name, value);
        }

        let mut request = Request::builder().method(method).uri(uri).version(version).body(()).map_err(ParseError::invalid_header)?;
        *request.headers_mut() = headers;

        let header = RequestHeader::from(request);
        let payload_size = payload_size(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Request framing per RFC 9112 section 6: chunked wins when it is the final transfer
/// coding, otherwise `Content-Length`, otherwise no body. Both at once is refused, it is
/// the classic smuggling vector.
fn payload_size(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let headers = header.headers();
    let transfer_encoding = headers.get(TRANSFER_ENCODING);

    let mut lengths = headers.get_all(CONTENT_LENGTH).iter();
    let content_length = lengths.next();
    if let Some(first) = content_length {
        ensure!(lengths.all(|other| other == first), ParseError::invalid_content_length("conflicting values"));
    }

    match (transfer_encoding, content_length) {
        (None, None) => Ok(PayloadSize::Empty),
        (Some(te), None) if is_chunked(te) => Ok(PayloadSize::Chunked),
        (Some(_), None) => Err(ParseError::invalid_header("transfer-encoding must end with chunked")),
        (None, Some(cl)) => {
            let cl = cl.to_str().map_err(|_opaque| ParseError::invalid_content_length("value is not visible ascii"))?;
            let length = cl.trim().parse::<u64>().map_err(|_parse| ParseError::invalid_content_length(format!("value {cl} is not u64")))?;
            Ok(PayloadSize::Length(length))
        }
        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// `chunked` must be the last coding in the list.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
