use crate::config::Config;
use crate::error::ProxyError;
use crate::hls::{PlaylistRewriter, ProxyUriBuilder, RewritePolicy};
use crate::relay::RelayOptions;
use crate::upstream::tls::{TlsPolicy, TrustBundle};
use crate::upstream::{
    Eviction, FetchExecutor, HostClassifier, OutboundBuilder, ReqwestTransport, RetryConfig,
    UpstreamTransport,
};
use reqwest::{Client, redirect};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Hardened-host verdicts, shared with the executor
    pub classifier: HostClassifier,
    pub builder: Arc<OutboundBuilder>,
    pub executor: Arc<FetchExecutor>,
    pub rewriter: Arc<PlaylistRewriter>,
    pub relay: Arc<RelayOptions>,
    pub tls_policy: TlsPolicy,
    pub custom_certificates: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Build state around a pooled reqwest client configured from `config` and `trust`.
    pub fn new(config: Config, trust: TrustBundle) -> Result<Self, ProxyError> {
        let tls_policy = TlsPolicy::select(&trust, config.tls_skip_verify);

        let builder = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(config.connect_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects));
        let client = tls_policy
            .configure(builder, &trust)
            .and_then(|b| b.build())
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let transport = Arc::new(ReqwestTransport::new(client, config.upstream_timeout));
        let mut state = Self::with_transport(config, transport, tls_policy);
        state.custom_certificates = trust.custom_certificates;
        Ok(state)
    }

    /// Build state around any transport (tests inject scripted ones).
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn UpstreamTransport>,
        tls_policy: TlsPolicy,
    ) -> Self {
        let classifier = HostClassifier::new(
            Eviction::from_capacity(config.classifier_max_hosts),
            config.hardened_hosts.clone(),
        );
        let retry = RetryConfig {
            attempts_per_strategy: config.attempts_per_strategy,
            backoff: config.strategy_backoff,
        };
        let executor = FetchExecutor::new(transport, classifier.clone(), retry);

        let policy =
            RewritePolicy::default().with_preserve_query_params(config.preserve_query_params);
        let proxy = ProxyUriBuilder::new(
            config.public_base_url.clone(),
            config.proxy_path.clone(),
            config.proxy_query_param.clone(),
        );

        let relay = RelayOptions {
            playlist_cache_control: config.playlist_cache_control.clone(),
            segment_cache_control: config.segment_cache_control.clone(),
        };

        Self {
            builder: Arc::new(OutboundBuilder::new(
                config.human_delay_min,
                config.human_delay_max,
            )),
            classifier,
            executor: Arc::new(executor),
            rewriter: Arc::new(PlaylistRewriter::new(policy, proxy)),
            relay: Arc::new(relay),
            tls_policy,
            custom_certificates: false,
            started_at: Instant::now(),
            config: Arc::new(config),
        }
    }
}
