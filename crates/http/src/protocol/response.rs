//! Response heads as they travel from an exchange to the connection writer.

use http::{HeaderMap, Response, StatusCode, Version};

/// The head of a response: status line and headers, no body.
pub type ResponseHead = Response<()>;

/// Builds a head from the status and headers an exchange collected.
pub(crate) fn build_head(status: StatusCode, headers: HeaderMap) -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = status;
    *head.version_mut() = Version::HTTP_11;
    *head.headers_mut() = headers;
    head
}

/// The informational head sent ahead of a request body.
pub(crate) fn continue_head() -> ResponseHead {
    build_head(StatusCode::CONTINUE, HeaderMap::new())
}
