//! HTTP/1.1 wire codec.
//!
//! [`RequestDecoder`] turns connection bytes into request heads followed by their payload
//! items, enforcing the header and entity size limits. [`ResponseEncoder`] does the reverse
//! for responses, including `100 Continue` interim heads.
//!
//! ```
//! use bytes::BytesMut;
//! use conduit_http::codec::RequestDecoder;
//! use conduit_http::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::with_limits(8 * 1024, 1024);
//! let mut buffer = BytesMut::from("GET /index HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let Ok(Some(Message::Header((header, _)))) = decoder.decode(&mut buffer) else {
//!     panic!("a complete head was buffered");
//! };
//! assert_eq!(header.path(), "/index");
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::MAX_HEADER_NUM;
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
