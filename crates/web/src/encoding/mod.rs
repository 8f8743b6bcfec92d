//! Response compression.
//!
//! [`EncodingHandler`] picks a content coding from the request's `Accept-Encoding` and,
//! when the handlers below it acquire the response channel, wraps that channel in an
//! [`EncodedChannel`]. Responses that already carry a `Content-Encoding`, that declare a
//! small `Content-Length`, or that cannot have a body are left alone.

mod channel;
mod encoder;

pub use channel::EncodedChannel;
pub use encoder::ContentCoding;

use async_trait::async_trait;
use conduit_http::channel::StreamSinkChannel;
use conduit_http::exchange::HttpServerExchange;
use conduit_http::handler::HttpHandler;
use conduit_http::protocol::HttpError;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderValue, StatusCode};
use tracing::{trace, warn};

use encoder::Encoder;

/// Bodies declared at or below this length are sent as they are.
pub const DEFAULT_MIN_LENGTH: u64 = 1024;

#[derive(Debug)]
pub struct EncodingHandler<H> {
    next: H,
    min_length: u64,
}

impl<H: HttpHandler> EncodingHandler<H> {
    pub fn new(next: H) -> Self {
        Self { next, min_length: DEFAULT_MIN_LENGTH }
    }

    pub fn with_min_length(mut self, min_length: u64) -> Self {
        self.min_length = min_length;
        self
    }
}

#[async_trait]
impl<H: HttpHandler> HttpHandler for EncodingHandler<H> {
    async fn handle_request(&self, exchange: &mut HttpServerExchange) -> Result<(), HttpError> {
        let coding = exchange
            .request_headers()
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");

        if let Some(coding) = ContentCoding::negotiate(&coding) {
            let min_length = self.min_length;
            exchange.add_response_wrapper(move |channel: StreamSinkChannel, exchange: &mut HttpServerExchange| {
                encode(channel, exchange, coding, min_length)
            });
        }
        self.next.handle_request(exchange).await
    }
}

fn encode(channel: StreamSinkChannel, exchange: &mut HttpServerExchange, coding: ContentCoding, min_length: u64) -> StreamSinkChannel {
    let status = exchange.response_code();
    if status.is_informational() || matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED) {
        return channel;
    }

    let skip = {
        let headers = exchange.response_headers();
        let declared = headers.get(CONTENT_LENGTH).and_then(|value| value.to_str().ok()).and_then(|value| value.parse::<u64>().ok());
        headers.contains_key(CONTENT_ENCODING) || declared.is_some_and(|length| length <= min_length)
    };
    if skip {
        trace!("response left unencoded");
        return channel;
    }

    let encoder = match Encoder::new(coding) {
        Ok(encoder) => encoder,
        Err(e) => {
            warn!(coding = coding.name(), cause = %e, "can't create encoder, sending response unencoded");
            return channel;
        }
    };
    let Ok(mut headers) = exchange.response_headers_mut() else {
        return channel;
    };
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_ENCODING, coding.header_value());
    headers.append(VARY, HeaderValue::from_static("accept-encoding"));

    trace!(coding = coding.name(), "encoding response");
    Box::new(EncodedChannel::new(channel, encoder))
}
