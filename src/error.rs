use crate::upstream::transport::{TransportError, TransportErrorKind};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Seconds a client is told to wait after a protected upstream refused us.
pub const PROTECTED_RETRY_AFTER_SECS: u64 = 30;

/// Dedicated status for upstream certificate failures (Cloudflare's "Invalid SSL Certificate").
pub const TLS_FAILURE_STATUS: u16 = 526;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing target URL parameter")]
    MissingTarget,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Target is not correctly percent-encoded: {0}")]
    InvalidEncoding(String),

    #[error("Target not allowed: {0}")]
    BlockedTarget(String),

    #[error("Request body rejected: {0}")]
    RequestBody(String),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Upstream {url} answered every strategy with a challenge page ({attempts} attempts)")]
    UpstreamProtected { url: String, attempts: usize },

    #[error("Failed to read upstream body: {0}")]
    UpstreamBody(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Machine-readable code placed in the `error` field of the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::MissingTarget => "missing_target",
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::InvalidEncoding(_) => "invalid_encoding",
            ProxyError::BlockedTarget(_) => "blocked_target",
            ProxyError::RequestBody(_) => "request_body_too_large",
            ProxyError::Transport(e) => match e.kind {
                TransportErrorKind::Timeout => "upstream_timeout",
                TransportErrorKind::Connect => "upstream_unavailable",
                TransportErrorKind::Tls => "upstream_tls_failure",
                TransportErrorKind::Dns => "upstream_dns_failure",
                TransportErrorKind::Other => "upstream_error",
            },
            ProxyError::UpstreamProtected { .. } => "upstream_protected",
            ProxyError::UpstreamBody(_) => "upstream_body_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget
            | ProxyError::InvalidTarget(_)
            | ProxyError::InvalidEncoding(_)
            | ProxyError::BlockedTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::RequestBody(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Transport(e) => match e.kind {
                TransportErrorKind::Connect => StatusCode::SERVICE_UNAVAILABLE,
                TransportErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                TransportErrorKind::Tls => {
                    StatusCode::from_u16(TLS_FAILURE_STATUS).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                TransportErrorKind::Dns | TransportErrorKind::Other => StatusCode::BAD_GATEWAY,
            },
            ProxyError::UpstreamProtected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status.as_u16(), self);
        } else {
            warn!("Rejected request ({}): {}", status.as_u16(), self);
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        let mut response = (status, body).into_response();
        if matches!(self, ProxyError::UpstreamProtected { .. }) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(PROTECTED_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: ProxyError) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn client_errors_are_400_with_code() {
        let (status, _, json) = body_json(ProxyError::MissingTarget).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "missing_target");
        assert!(json["timestamp"].is_string());

        let (status, _, json) = body_json(ProxyError::InvalidTarget("x".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_target");
    }

    #[test]
    fn transport_kinds_map_to_distinct_statuses() {
        let status = |kind| ProxyError::Transport(TransportError::new(kind, "boom")).status();
        assert_eq!(status(TransportErrorKind::Connect), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(TransportErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status(TransportErrorKind::Tls).as_u16(), TLS_FAILURE_STATUS);
        assert_eq!(status(TransportErrorKind::Dns), StatusCode::BAD_GATEWAY);
        assert_eq!(status(TransportErrorKind::Other), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn protected_upstream_sets_retry_after() {
        let (status, headers, json) = body_json(ProxyError::UpstreamProtected {
            url: "https://blocked.example/video".into(),
            attempts: 3,
        })
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "30");
        assert_eq!(json["error"], "upstream_protected");
    }
}
