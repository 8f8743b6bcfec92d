//! Protocol level types shared by the codec, the exchange and the connection.
//!
//! - `message`: [`Message`], [`PayloadItem`] and [`PayloadSize`], the units the codec
//!   produces and consumes
//! - `request`: [`RequestHeader`], a parsed request head
//! - `response`: [`ResponseHead`], a response status line plus headers
//! - [`body`]: [`body::ReqBody`] and its producer, streaming request bodies on demand
//! - `error`: the closed error set ([`HttpError`], [`ParseError`], [`SendError`],
//!   [`ExchangeError`])

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub(crate) use request::has_token;
pub use request::RequestHeader;

mod response;
pub(crate) use response::{build_head, continue_head};
pub use response::ResponseHead;

mod error;
pub use error::ExchangeError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
