//! Turning the client-supplied target into an upstream URL.

use crate::error::{ProxyError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Decode a query string strictly, so malformed UTF-8 is an error rather than
/// replacement characters.
pub fn parse_query(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| ProxyError::InvalidEncoding(format!("{raw}: {e}")))
}

/// Normalise a decoded target into an absolute http(s) URL.
///
/// Whitespace is dropped, backslashes become slashes, a value that still looks
/// percent-encoded is decoded once more, and a missing scheme becomes `https`.
///
/// # Errors
/// - [`ProxyError::MissingTarget`] for an empty value
/// - [`ProxyError::InvalidEncoding`] when the second decode fails
/// - [`ProxyError::InvalidTarget`] for unparseable URLs, non-http schemes or a missing host
pub fn normalize_target(raw: &str) -> Result<Url> {
    let mut target = clean(raw);
    if target.is_empty() {
        return Err(ProxyError::MissingTarget);
    }

    if !target.contains("://") && target.contains('%') {
        let decoded = urlencoding::decode(&target)
            .map_err(|e| ProxyError::InvalidEncoding(format!("{target}: {e}")))?;
        target = clean(&decoded);
    }

    let absolute = if target.contains("://") {
        target
    } else if let Some(rest) = target.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{target}")
    };

    let url = Url::parse(&absolute)
        .map_err(|e| ProxyError::InvalidTarget(format!("{absolute}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ProxyError::InvalidTarget(format!(
                "Scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProxyError::InvalidTarget(format!("No host in {absolute}")));
    }

    Ok(url)
}

fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '\\' { '/' } else { c })
        .collect()
}

/// Append the client's extra query pairs to the target.
pub fn append_pairs(target: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        return;
    }
    let mut query = target.query_pairs_mut();
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
}

/// Reject targets whose host is a private or reserved IP literal.
///
/// Hostnames are accepted without DNS resolution, so a public name pointing
/// at a private address still passes.
///
/// # Errors
/// Returns [`ProxyError::BlockedTarget`] for:
/// - IPv4 addresses in private/reserved ranges
/// - IPv6 loopback, link-local and unique-local addresses
/// - the literal `localhost`
pub fn validate_public_host(url: &Url) -> Result<()> {
    match url.host() {
        Some(Host::Ipv4(ip)) if is_blocked_ipv4(ip) => Err(ProxyError::BlockedTarget(format!(
            "Private or reserved IPv4 address not allowed: {ip}"
        ))),
        Some(Host::Ipv6(ip)) if is_blocked_ipv6(ip) => Err(ProxyError::BlockedTarget(format!(
            "Private or reserved IPv6 address not allowed: {ip}"
        ))),
        Some(Host::Domain(name)) if name.eq_ignore_ascii_case("localhost") => {
            Err(ProxyError::BlockedTarget("localhost not allowed".to_string()))
        }
        Some(_) => Ok(()),
        None => Err(ProxyError::InvalidTarget(format!("No host in {url}"))),
    }
}

/// Blocked ranges:
/// - `0.0.0.0/8`      "this" network (RFC 1122)
/// - `10.0.0.0/8`     RFC 1918 private
/// - `127.0.0.0/8`    loopback
/// - `169.254.0.0/16` link-local / cloud metadata
/// - `172.16.0.0/12`  RFC 1918 private
/// - `192.168.0.0/16` RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Blocked ranges: `::1`, `fe80::/10` link-local, `fc00::/7` unique-local.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_loopback() || (s[0] & 0xffc0) == 0xfe80 || (s[0] & 0xfe00) == 0xfc00
}
