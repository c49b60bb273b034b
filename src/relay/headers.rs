//! Response header policy: a single allowlist, plus relay diagnostics.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use std::time::Duration;

/// Upstream response headers that reach the client. Everything else is dropped,
/// including CSP, frame options, cookies, hop-by-hop and CDN tracking headers.
pub static FORWARDED: [HeaderName; 13] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_LANGUAGE,
    header::CONTENT_DISPOSITION,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::ETAG,
    header::LAST_MODIFIED,
    header::EXPIRES,
    header::CACHE_CONTROL,
    header::AGE,
    header::DATE,
    header::VARY,
];

pub const VIA_VALUE: &str = "1.1 hls-relay";

pub fn x_proxy_time() -> HeaderName {
    HeaderName::from_static("x-proxy-time")
}

pub fn filter(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(FORWARDED.len() + 2);
    for name in &FORWARDED {
        for value in upstream.get_all(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Add `via` and the elapsed upstream time.
pub fn stamp(headers: &mut HeaderMap, elapsed: Duration) {
    headers.insert(header::VIA, HeaderValue::from_static(VIA_VALUE));
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        headers.insert(x_proxy_time(), value);
    }
}
