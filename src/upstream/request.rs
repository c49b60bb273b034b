//! Outbound request construction.
//!
//! Inbound headers are cloned minus anything that identifies the client's
//! connection to us or the proxy itself. Browser-like defaults fill the gaps,
//! and hardened hosts get a synthetic fingerprint plus a human-like delay.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use bytes::Bytes;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::time::Duration;
use url::Url;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
];

const FINGERPRINTS: &[&[(&str, &str)]] = &[
    &[
        ("sec-ch-ua", r#""Google Chrome";v="119", "Chromium";v="119", "Not?A_Brand";v="24""#),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""Windows""#),
        ("sec-fetch-site", "none"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-user", "?1"),
        ("sec-fetch-dest", "document"),
        ("upgrade-insecure-requests", "1"),
    ],
    &[
        ("sec-ch-ua", r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""macOS""#),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-dest", "document"),
        ("upgrade-insecure-requests", "1"),
    ],
];

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
/// Only encodings the relay knows how to undo.
const ACCEPT_ENCODING: &str = "gzip, deflate, br, zstd";

/// Exact header names never forwarded upstream.
const STRIPPED: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "accept-encoding",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "forwarded",
    "via",
    "x-real-ip",
    "x-proxy-id",
    "origin",
    "referer",
];

/// Header-name prefixes never forwarded upstream.
const STRIPPED_PREFIXES: &[&str] = &["x-forwarded-", "cf-", "x-cf-"];

fn is_stripped(name: &HeaderName) -> bool {
    let name = name.as_str();
    STRIPPED.contains(&name) || STRIPPED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Everything needed to issue one upstream request, reused across strategies.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub hardened: bool,
    /// Sleep before the first attempt
    pub human_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct OutboundBuilder {
    delay_min: Duration,
    delay_max: Duration,
}

impl Default for OutboundBuilder {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(1500))
    }
}

impl OutboundBuilder {
    pub fn new(delay_min: Duration, delay_max: Duration) -> Self {
        Self {
            delay_min,
            delay_max: delay_max.max(delay_min),
        }
    }

    pub fn build(
        &self,
        method: Method,
        inbound: &HeaderMap,
        body: Bytes,
        target: &Url,
        hardened: bool,
    ) -> OutboundRequest {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 12);
        for (name, value) in inbound {
            if !is_stripped(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let mut rng = rand::rng();

        if !headers.contains_key(header::USER_AGENT)
            && let Some(ua) = USER_AGENTS.choose(&mut rng)
        {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(*ua));
        }
        set_default(&mut headers, header::ACCEPT, DEFAULT_ACCEPT);
        set_default(&mut headers, header::ACCEPT_LANGUAGE, DEFAULT_ACCEPT_LANGUAGE);
        set_default(&mut headers, header::CACHE_CONTROL, "no-cache");
        set_default(&mut headers, header::PRAGMA, "no-cache");
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING));

        let mut human_delay = None;
        if hardened {
            if let Some(fingerprint) = FINGERPRINTS.choose(&mut rng) {
                for (name, value) in fingerprint.iter() {
                    headers.insert(*name, HeaderValue::from_static(*value));
                }
            }
            let origin = target.origin().ascii_serialization();
            if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
                headers.insert(header::REFERER, referer);
            }
            human_delay = Some(if self.delay_max > self.delay_min {
                rng.random_range(self.delay_min..=self.delay_max)
            } else {
                self.delay_min
            });
        }

        OutboundRequest {
            method,
            headers,
            body: (!body.is_empty()).then_some(body),
            hardened,
            human_delay,
        }
    }
}

fn set_default(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    if !headers.contains_key(&name) {
        headers.insert(name, HeaderValue::from_static(value));
    }
}
