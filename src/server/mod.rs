pub mod handlers;
pub mod state;
pub mod target;

use crate::config::Config;
use crate::metrics;
use crate::upstream::tls::TrustBundle;
use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use state::AppState;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info};

pub const VERSION_HEADER: &str = "x-hls-relay-version";

static CORS_HEADERS: [(HeaderName, &str); 5] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (
        header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS",
    ),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
    (header::ACCESS_CONTROL_EXPOSE_HEADERS, "*"),
    (header::ACCESS_CONTROL_MAX_AGE, "86400"),
];

fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in &CORS_HEADERS {
        headers.insert(name.clone(), HeaderValue::from_static(*value));
    }
}

/// Answer preflights directly and stamp CORS headers on everything else,
/// error responses included.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    apply_cors(response.headers_mut());
    response
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": "No such endpoint",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let proxy_path = state.config.proxy_path.clone();

    Router::new()
        .route("/", get(handlers::info::info_page))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route(&proxy_path, any(handlers::proxy::proxy_query))
        .route(
            &format!("{proxy_path}/{{*target}}"),
            any(handlers::proxy::proxy_path),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum HTTP server
pub async fn start(config: Config, trust: TrustBundle) -> Result<(), Box<dyn std::error::Error>> {
    metrics::init();

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config, trust)?;
    info!(
        "Upstream TLS verification: {} (custom certificates: {})",
        state.tls_policy.as_str(),
        state.custom_certificates
    );

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
