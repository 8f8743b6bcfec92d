//! The parsed head of an HTTP request.

use http::header::{CONNECTION, EXPECT};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version};

/// A request head as produced by the decoder: method, uri, version and headers,
/// without any body attached.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.uri().query()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// `Expect: 100-continue` on an HTTP/1.1 request.
    pub fn expects_continue(&self) -> bool {
        self.version() == Version::HTTP_11
            && self.headers().get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    /// Whether the client allows this connection to carry another request.
    pub fn is_persistent(&self) -> bool {
        let connection = self.headers().get_all(CONNECTION);
        match self.version() {
            Version::HTTP_11 => !connection.iter().any(|value| has_token(value, "close")),
            Version::HTTP_10 => connection.iter().any(|value| has_token(value, "keep-alive")),
            _ => false,
        }
    }
}

/// Checks a comma separated header value for a token, ignoring case.
pub(crate) fn has_token(value: &HeaderValue, token: &str) -> bool {
    value.as_bytes().split(|b| *b == b',').any(|part| part.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, headers: &[(&'static str, &'static str)]) -> RequestHeader {
        let mut builder = Request::builder().method(Method::POST).uri("/upload?name=a").version(version);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestHeader::from(builder.body(()).unwrap())
    }

    #[test]
    fn path_and_query() {
        let header = header(Version::HTTP_11, &[]);
        assert_eq!(header.path(), "/upload");
        assert_eq!(header.query(), Some("name=a"));
        assert_eq!(header.method(), &Method::POST);
    }

    #[test]
    fn expect_continue_only_for_http_11() {
        assert!(header(Version::HTTP_11, &[("Expect", "100-Continue")]).expects_continue());
        assert!(!header(Version::HTTP_10, &[("Expect", "100-continue")]).expects_continue());
        assert!(!header(Version::HTTP_11, &[("Expect", "something-else")]).expects_continue());
    }

    #[test]
    fn persistence_rules() {
        assert!(header(Version::HTTP_11, &[]).is_persistent());
        assert!(!header(Version::HTTP_11, &[("Connection", "Upgrade, close")]).is_persistent());
        assert!(!header(Version::HTTP_10, &[]).is_persistent());
        assert!(header(Version::HTTP_10, &[("Connection", "Keep-Alive")]).is_persistent());
    }
}
