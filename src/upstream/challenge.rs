//! Recognizing bot-mitigation challenge pages.

use crate::relay::decode::{decode_body, is_encoded};
use axum::http::{HeaderMap, StatusCode, header};

/// Lowercase markers found in interstitial challenge pages.
const BODY_MARKERS: &[&str] = &[
    "checking your browser",
    "just a moment",
    "jschl_vc",
    "jschl_answer",
    "cf-challenge",
    "challenge-platform",
    "please enable cookies",
    "ddos protection by",
    "attention required",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Blocking status from a mitigation edge, identified by headers alone
    EdgeBlock,
    /// Body contained a known interstitial marker
    Interstitial(&'static str),
}

fn is_blocking_status(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::SERVICE_UNAVAILABLE
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Header-only verdict.
pub fn detect_from_headers(status: StatusCode, headers: &HeaderMap) -> Option<ChallengeKind> {
    if !is_blocking_status(status) {
        return None;
    }
    let cloudflare_server = header_str(headers, header::SERVER)
        .is_some_and(|s| s.to_ascii_lowercase().contains("cloudflare"));
    let mitigated = headers.contains_key("cf-mitigated") || headers.contains_key("cf-ray");
    (cloudflare_server || mitigated).then_some(ChallengeKind::EdgeBlock)
}

/// Whether the body must be read before the response can be trusted.
pub fn needs_body(status: StatusCode, headers: &HeaderMap) -> bool {
    matches!(status.as_u16(), 403 | 429 | 503)
        || header_str(headers, header::CONTENT_TYPE)
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
}

/// Scan a (possibly compressed) body for interstitial markers.
pub async fn detect_in_body(headers: &HeaderMap, body: &[u8]) -> Option<ChallengeKind> {
    let encoding = header_str(headers, header::CONTENT_ENCODING);
    let text = if is_encoded(encoding) {
        let decoded = decode_body(encoding.unwrap_or_default(), body).await.ok()?;
        String::from_utf8_lossy(&decoded).to_lowercase()
    } else {
        String::from_utf8_lossy(body).to_lowercase()
    };

    BODY_MARKERS
        .iter()
        .copied()
        .find(|marker| text.contains(marker))
        .map(ChallengeKind::Interstitial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn cloudflare_block_detected_from_headers() {
        let h = headers(&[("server", "cloudflare")]);
        assert_eq!(
            detect_from_headers(StatusCode::SERVICE_UNAVAILABLE, &h),
            Some(ChallengeKind::EdgeBlock)
        );
        assert_eq!(detect_from_headers(StatusCode::OK, &h), None);
        assert_eq!(
            detect_from_headers(StatusCode::FORBIDDEN, &headers(&[("cf-mitigated", "challenge")])),
            Some(ChallengeKind::EdgeBlock)
        );
        assert_eq!(
            detect_from_headers(StatusCode::FORBIDDEN, &headers(&[("server", "nginx")])),
            None
        );
    }

    #[test]
    fn body_inspection_gated_by_status_or_html() {
        assert!(needs_body(StatusCode::SERVICE_UNAVAILABLE, &HeaderMap::new()));
        assert!(needs_body(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()));
        assert!(needs_body(
            StatusCode::OK,
            &headers(&[("content-type", "text/html; charset=utf-8")])
        ));
        assert!(!needs_body(
            StatusCode::OK,
            &headers(&[("content-type", "video/mp2t")])
        ));
    }

    #[tokio::test]
    async fn finds_markers_case_insensitively() {
        let body = b"<html><title>Just a moment...</title>Checking your browser</html>";
        assert!(matches!(
            detect_in_body(&HeaderMap::new(), body).await,
            Some(ChallengeKind::Interstitial(_))
        ));
        assert_eq!(detect_in_body(&HeaderMap::new(), b"<html>hello</html>").await, None);
    }

    #[tokio::test]
    async fn decodes_before_scanning() {
        use async_compression::tokio::bufread::GzipEncoder;
        use tokio::io::AsyncReadExt;

        let mut gz = Vec::new();
        GzipEncoder::new(&b"please enable cookies"[..])
            .read_to_end(&mut gz)
            .await
            .unwrap();
        let h = headers(&[("content-encoding", "gzip")]);
        assert_eq!(
            detect_in_body(&h, &gz).await,
            Some(ChallengeKind::Interstitial("please enable cookies"))
        );
    }
}
