//! Request head decoding and response head encoding.
//!
//! [`HeaderDecoder`] enforces the header size limit and works out request framing;
//! [`HeaderEncoder`] writes the status line and the framing headers of a response.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_decoder::MAX_HEADER_NUM;
pub use header_encoder::HeaderEncoder;
pub(crate) use header_encoder::BytesWriter;
