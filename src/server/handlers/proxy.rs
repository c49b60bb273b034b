use crate::{
    error::{ProxyError, Result},
    metrics,
    relay::relay,
    server::{
        state::AppState,
        target::{append_pairs, normalize_target, parse_query, validate_public_host},
    },
};
use axum::{
    body::Body,
    extract::{Path, RawQuery, State, rejection::PathRejection},
    http::{HeaderMap, Method},
    response::Response,
};
use std::time::Instant;
use tracing::info;
use url::Url;

/// Query parameter names accepted for the target, besides the configured one.
const TARGET_PARAMS: &[&str] = &["u", "url"];

/// Proxy `{PROXY_PATH}?u=<target>`.
///
/// Any other query pairs are appended to the target's own query.
pub async fn proxy_query(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Body,
) -> Result<Response> {
    let mut pairs = parse_query(query.as_deref().unwrap_or_default())?;
    let param = state.config.proxy_query_param.as_str();
    let is_target = |key: &str| key == param || TARGET_PARAMS.contains(&key);

    let position = pairs
        .iter()
        .position(|(key, _)| is_target(key))
        .ok_or(ProxyError::MissingTarget)?;
    let (_, raw) = pairs.remove(position);
    pairs.retain(|(key, _)| !is_target(key));

    let mut target = normalize_target(&raw)?;
    append_pairs(&mut target, &pairs);

    forward(&state, method, &headers, body, target).await
}

/// Proxy `{PROXY_PATH}/<percent-encoded target>`.
///
/// The client's query string is handed to the target when the target has none.
pub async fn proxy_path(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    path: std::result::Result<Path<String>, PathRejection>,
    RawQuery(query): RawQuery,
    body: Body,
) -> Result<Response> {
    let Path(raw) = path.map_err(|e| ProxyError::InvalidEncoding(e.body_text()))?;
    let mut target = normalize_target(&raw)?;

    if target.query().is_none()
        && let Some(query) = query.filter(|q| !q.is_empty())
    {
        target.set_query(Some(&query));
    }

    forward(&state, method, &headers, body, target).await
}

async fn forward(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    body: Body,
    target: Url,
) -> Result<Response> {
    let start = Instant::now();
    let result = fetch_and_relay(state, method, headers, body, &target).await;

    let status = match &result {
        Ok(response) => response.status().as_u16(),
        Err(e) => e.status().as_u16(),
    };
    metrics::record_request("proxy", status);
    metrics::record_duration("proxy", start);

    result
}

async fn fetch_and_relay(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    body: Body,
    target: &Url,
) -> Result<Response> {
    if state.config.block_private_targets {
        validate_public_host(target)?;
    }

    let body = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|e| ProxyError::RequestBody(e.to_string()))?;

    let hardened = state
        .classifier
        .classify(target.host_str().unwrap_or_default());
    info!("Proxying {} {} (hardened: {})", method, target, hardened);

    let outbound = state.builder.build(method, headers, body, target, hardened);
    let fetched = state.executor.execute(&outbound, target).await?;
    info!(
        "Fetched {} via {} in {}ms ({} attempts)",
        fetched.response.url,
        fetched.strategy.name(),
        fetched.elapsed.as_millis(),
        fetched.attempts
    );

    relay(fetched, &state.rewriter, &state.relay).await
}
