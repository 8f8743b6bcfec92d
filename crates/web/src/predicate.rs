//! Ready-made [`Predicate`]s over the request head, and ways to combine them.
//!
//! ```
//! use conduit_web::predicate::{all_predicate, get_method, not, path_prefix};
//!
//! let mut predicate = all_predicate();
//! predicate.and(get_method()).and(not(path_prefix("/admin")));
//! ```

use conduit_http::exchange::HttpServerExchange;
use conduit_http::handler::Predicate;
use conduit_http::protocol::PayloadSize;
use http::{HeaderName, HeaderValue, Method};

pub use conduit_http::handler::{FalsePredicate, TruePredicate, fn_predicate};

pub fn always() -> TruePredicate {
    TruePredicate
}

pub fn never() -> FalsePredicate {
    FalsePredicate
}

pub fn any_predicate() -> AnyPredicate {
    AnyPredicate::default()
}

/// Composes predicates with *OR* logic. An empty `AnyPredicate` resolves to `true`.
#[derive(Default)]
pub struct AnyPredicate {
    predicates: Vec<Box<dyn Predicate>>,
}

impl AnyPredicate {
    pub fn or<P: Predicate + 'static>(&mut self, predicate: P) -> &mut Self {
        self.predicates.push(Box::new(predicate));
        self
    }
}

impl Predicate for AnyPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        self.predicates.is_empty() || self.predicates.iter().any(|predicate| predicate.resolve(exchange))
    }
}

impl std::fmt::Debug for AnyPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyPredicate").field("predicates", &self.predicates.len()).finish()
    }
}

pub fn all_predicate() -> AllPredicate {
    AllPredicate::default()
}

/// Composes predicates with *AND* logic. An empty `AllPredicate` resolves to `true`.
#[derive(Default)]
pub struct AllPredicate {
    predicates: Vec<Box<dyn Predicate>>,
}

impl AllPredicate {
    pub fn and<P: Predicate + 'static>(&mut self, predicate: P) -> &mut Self {
        self.predicates.push(Box::new(predicate));
        self
    }
}

impl Predicate for AllPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        self.predicates.iter().all(|predicate| predicate.resolve(exchange))
    }
}

impl std::fmt::Debug for AllPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllPredicate").field("predicates", &self.predicates.len()).finish()
    }
}

pub fn not<P: Predicate>(predicate: P) -> NotPredicate<P> {
    NotPredicate(predicate)
}

#[derive(Debug)]
pub struct NotPredicate<P>(P);

impl<P: Predicate> Predicate for NotPredicate<P> {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        !self.0.resolve(exchange)
    }
}

#[derive(Debug)]
pub struct MethodPredicate(Method);

pub fn method(method: Method) -> MethodPredicate {
    MethodPredicate(method)
}

impl Predicate for MethodPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        *exchange.method() == self.0
    }
}

macro_rules! method_predicate {
    ($method:ident, $upper_case_method:ident) => {
        #[inline]
        pub fn $method() -> MethodPredicate {
            MethodPredicate(Method::$upper_case_method)
        }
    };
}

method_predicate!(get_method, GET);
method_predicate!(post_method, POST);
method_predicate!(put_method, PUT);
method_predicate!(delete_method, DELETE);
method_predicate!(head_method, HEAD);
method_predicate!(options_method, OPTIONS);
method_predicate!(connect_method, CONNECT);
method_predicate!(patch_method, PATCH);
method_predicate!(trace_method, TRACE);

/// Matches the exact request path, without the query.
#[derive(Debug)]
pub struct PathPredicate(String);

pub fn path(path: impl Into<String>) -> PathPredicate {
    PathPredicate(path.into())
}

impl Predicate for PathPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        exchange.path() == self.0
    }
}

/// Matches a path equal to the prefix or below it: `/api` matches `/api` and `/api/users`
/// but not `/apis`.
#[derive(Debug)]
pub struct PathPrefixPredicate(String);

pub fn path_prefix(prefix: impl Into<String>) -> PathPrefixPredicate {
    let mut prefix = prefix.into();
    while prefix.len() > 1 && prefix.ends_with('/') {
        prefix.pop();
    }
    PathPrefixPredicate(prefix)
}

impl Predicate for PathPrefixPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        let Some(rest) = exchange.path().strip_prefix(self.0.as_str()) else {
            return false;
        };
        rest.is_empty() || rest.starts_with('/') || self.0 == "/"
    }
}

/// Matches when the request carries the header with exactly this value.
#[derive(Debug)]
pub struct HeaderPredicate(HeaderName, HeaderValue);

pub fn header<K, V>(header_name: K, header_value: V) -> Result<HeaderPredicate, http::Error>
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = <HeaderName as TryFrom<K>>::try_from(header_name).map_err(Into::into)?;
    let value = <HeaderValue as TryFrom<V>>::try_from(header_value).map_err(Into::into)?;
    Ok(HeaderPredicate(name, value))
}

impl Predicate for HeaderPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        exchange.request_headers().get_all(&self.0).iter().any(|value| *value == self.1)
    }
}

#[derive(Debug)]
pub struct ContainsHeaderPredicate(HeaderName);

pub fn contains_header(header_name: HeaderName) -> ContainsHeaderPredicate {
    ContainsHeaderPredicate(header_name)
}

impl Predicate for ContainsHeaderPredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        exchange.request_headers().contains_key(&self.0)
    }
}

/// Matches a request that declares a `Content-Length` larger than `max`. Chunked
/// requests never match: their size is unknown until read.
#[derive(Debug)]
pub struct MaxContentSizePredicate(u64);

pub fn max_content_size(max: u64) -> MaxContentSizePredicate {
    MaxContentSizePredicate(max)
}

impl Predicate for MaxContentSizePredicate {
    fn resolve(&self, exchange: &HttpServerExchange) -> bool {
        matches!(exchange.request_payload_size(), PayloadSize::Length(length) if length > self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_http::protocol::RequestHeader;
    use http::Request;
    use http::header::{ACCEPT, CONTENT_TYPE};

    fn exchange(method: Method, uri: &str) -> HttpServerExchange {
        let request = Request::builder().method(method).uri(uri).header(ACCEPT, "text/html").body(()).unwrap();
        HttpServerExchange::new_detached(RequestHeader::from(request))
    }

    #[test]
    fn methods() {
        let exchange = exchange(Method::POST, "/");
        assert!(post_method().resolve(&exchange));
        assert!(method(Method::POST).resolve(&exchange));
        assert!(!get_method().resolve(&exchange));
    }

    #[test]
    fn paths() {
        let exchange = exchange(Method::GET, "/api/users?page=2");
        assert!(path("/api/users").resolve(&exchange));
        assert!(!path("/api").resolve(&exchange));

        assert!(path_prefix("/api").resolve(&exchange));
        assert!(path_prefix("/api/").resolve(&exchange));
        assert!(path_prefix("/").resolve(&exchange));
        assert!(!path_prefix("/ap").resolve(&exchange));
    }

    #[test]
    fn headers() {
        let exchange = exchange(Method::GET, "/");
        assert!(header(ACCEPT, "text/html").unwrap().resolve(&exchange));
        assert!(!header(ACCEPT, "text/plain").unwrap().resolve(&exchange));
        assert!(contains_header(ACCEPT).resolve(&exchange));
        assert!(!contains_header(CONTENT_TYPE).resolve(&exchange));
        assert!(header("bad header", "x").is_err());
    }

    #[test]
    fn detached_exchange_has_no_content_size() {
        assert!(!max_content_size(0).resolve(&exchange(Method::POST, "/")));
    }

    #[test]
    fn combinators() {
        let exchange = exchange(Method::GET, "/admin/users");

        let mut all = all_predicate();
        all.and(get_method()).and(not(path_prefix("/admin")));
        assert!(!all.resolve(&exchange));

        let mut any = any_predicate();
        any.or(post_method()).or(path_prefix("/admin"));
        assert!(any.resolve(&exchange));

        assert!(all_predicate().resolve(&exchange));
        assert!(any_predicate().resolve(&exchange));
        assert!(always().resolve(&exchange));
        assert!(!never().resolve(&exchange));
        assert!(fn_predicate(|exchange: &HttpServerExchange| exchange.query().is_none()).resolve(&exchange));
    }
}
