//! Prometheus metrics for the relay.
//!
//! Handlers record through the `metrics` facade; the exporter recorder is
//! installed once per process and rendered at `/metrics`.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call repeatedly.
pub fn init() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Render the current metrics in Prometheus text format.
pub fn render() -> String {
    HANDLE
        .get()
        .and_then(|h| h.as_ref())
        .map(|h| h.render())
        .unwrap_or_default()
}

pub fn record_request(kind: &'static str, status: u16) {
    counter!("relay_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
}

pub fn record_duration(kind: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_attempt(strategy: &'static str, outcome: &'static str) {
    counter!("relay_upstream_attempts_total", "strategy" => strategy, "outcome" => outcome)
        .increment(1);
}

pub fn record_challenge() {
    counter!("relay_upstream_challenges_total").increment(1);
}

pub fn record_rewrite(mode: &'static str) {
    counter!("relay_playlist_rewrites_total", "mode" => mode).increment(1);
}

pub fn record_decode_failure() {
    counter!("relay_decode_failures_total").increment(1);
}
