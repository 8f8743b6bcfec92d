//! The cached value of the `Date` response header.
//!
//! Formatting a date for every response is wasted work: the value only changes once a
//! second. The formatted value is kept in an [`ArcSwap`] and replaced by whichever
//! writer first notices it is stale, so readers never lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use http::HeaderValue;
use once_cell::sync::Lazy;
use tracing::warn;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct CachedDate {
    formatted_at: Instant,
    value: HeaderValue,
}

static CURRENT: Lazy<ArcSwap<Option<CachedDate>>> = Lazy::new(|| ArcSwap::from_pointee(format_now()));

fn format_now() -> Option<CachedDate> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    match HeaderValue::from_bytes(&buf[..]) {
        Ok(value) => Some(CachedDate { formatted_at: Instant::now(), value }),
        Err(e) => {
            warn!(cause = %e, "formatted date is not a valid header value");
            None
        }
    }
}

/// The current date as an HTTP header value, at most one second old.
pub(crate) fn http_date() -> Option<HeaderValue> {
    let current = CURRENT.load();
    if let Some(cached) = current.as_ref()
        && cached.formatted_at.elapsed() < REFRESH_INTERVAL
    {
        return Some(cached.value.clone());
    }

    let fresh = Arc::new(format_now());
    CURRENT.store(Arc::clone(&fresh));
    fresh.as_ref().as_ref().map(|cached| cached.value.clone())
}
