use crate::server::state::AppState;
use axum::{extract::State, response::Html};

/// Landing page describing how to call the proxy.
pub async fn info_page(State(state): State<AppState>) -> Html<String> {
    let path = &state.config.proxy_path;
    let param = &state.config.proxy_query_param;
    let tls = state.tls_policy.as_str();
    let version = env!("CARGO_PKG_VERSION");

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
	<meta charset="utf-8">
	<title>hls-relay</title>
	<style>
		body {{ font-family: system-ui, sans-serif; max-width: 760px; margin: 40px auto; padding: 0 16px; color: #222; }}
		code {{ background: #f3f3f3; padding: 2px 6px; border-radius: 4px; }}
	</style>
</head>
<body>
	<h1>hls-relay {version}</h1>
	<p>Streaming HTTP proxy for HLS. Playlists are rewritten so every segment, key and variant is fetched through this server.</p>
	<h2>Usage</h2>
	<p>Query form: <code>{path}?{param}=https%3A%2F%2Fcdn.example%2Flive%2Findex.m3u8</code></p>
	<p>Path form: <code>{path}/https%3A%2F%2Fcdn.example%2Flive%2Findex.m3u8</code></p>
	<p>Any method is forwarded. Extra query parameters are appended to the target.</p>
	<h2>Status</h2>
	<p><a href="/health">/health</a> &middot; <a href="/metrics">/metrics</a></p>
	<p>Upstream TLS verification: <strong>{tls}</strong></p>
</body>
</html>"#
    ))
}
