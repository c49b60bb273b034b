//! Ordered upstream fetch strategies with bounded retry.
//!
//! [`plan`] turns a target into an explicit list of attempts; [`FetchExecutor`]
//! walks that list, classifying each outcome as success, transport error or
//! challenge, and stops at the first success.

use super::challenge::{self, ChallengeKind};
use super::classifier::HostClassifier;
use super::request::OutboundRequest;
use super::transport::{TransportError, UpstreamBody, UpstreamResponse, UpstreamTransport};
use crate::error::ProxyError;
use crate::metrics;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::{Host, Url};

/// Default number of tries per strategy.
pub const DEFAULT_ATTEMPTS_PER_STRATEGY: u32 = 1;

/// Default pause before retrying or moving to the next strategy, in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Tries per strategy (minimum 1; 0 is treated as 1).
    pub attempts_per_strategy: u32,
    /// Sleep between a failed try and the next one.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts_per_strategy: DEFAULT_ATTEMPTS_PER_STRATEGY,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

/// One way of reaching the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AsIs,
    /// `https` → `http`
    DowngradeHttp,
    /// `host` → `www.host`
    WwwPrefix,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [Strategy::AsIs, Strategy::DowngradeHttp, Strategy::WwwPrefix];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::AsIs => "as_is",
            Strategy::DowngradeHttp => "downgrade_http",
            Strategy::WwwPrefix => "www_prefix",
        }
    }

    /// The URL this strategy would fetch, or `None` when it does not apply.
    pub fn apply(&self, target: &Url) -> Option<Url> {
        match self {
            Strategy::AsIs => Some(target.clone()),
            Strategy::DowngradeHttp => {
                if target.scheme() != "https" {
                    return None;
                }
                let mut url = target.clone();
                url.set_scheme("http").ok()?;
                Some(url)
            }
            Strategy::WwwPrefix => {
                let Some(Host::Domain(domain)) = target.host() else {
                    return None;
                };
                let lower = domain.to_ascii_lowercase();
                if lower.starts_with("www.")
                    || lower == "localhost"
                    || !lower.contains('.')
                    || lower.parse::<IpAddr>().is_ok()
                {
                    return None;
                }
                let mut url = target.clone();
                url.set_host(Some(&format!("www.{domain}"))).ok()?;
                Some(url)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAttempt {
    pub strategy: Strategy,
    pub url: Url,
}

/// Applicable strategies in order, without duplicate URLs.
pub fn plan(target: &Url) -> Vec<PlannedAttempt> {
    let mut attempts: Vec<PlannedAttempt> = Vec::with_capacity(Strategy::ORDER.len());
    for strategy in Strategy::ORDER {
        if let Some(url) = strategy.apply(target)
            && !attempts.iter().any(|a| a.url == url)
        {
            attempts.push(PlannedAttempt { strategy, url });
        }
    }
    attempts
}

/// What a single try produced.
#[derive(Debug)]
pub enum Outcome {
    Success(UpstreamResponse),
    Transport(TransportError),
    Challenge(ChallengeKind),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Transport(_) => "transport_error",
            Outcome::Challenge(_) => "challenge",
        }
    }
}

/// A usable upstream response and how it was obtained.
#[derive(Debug)]
pub struct Fetched {
    pub response: UpstreamResponse,
    pub strategy: Strategy,
    pub attempts: usize,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn UpstreamTransport>,
    classifier: HostClassifier,
    retry: RetryConfig,
}

impl FetchExecutor {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        classifier: HostClassifier,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            classifier,
            retry,
        }
    }

    /// Try each planned strategy until one yields a non-challenged response.
    ///
    /// # Errors
    ///
    /// [`ProxyError::UpstreamProtected`] when any try hit a challenge page and
    /// none succeeded; otherwise the last transport error.
    pub async fn execute(
        &self,
        request: &OutboundRequest,
        target: &Url,
    ) -> Result<Fetched, ProxyError> {
        let start = Instant::now();
        let host = target.host_str().unwrap_or_default().to_string();

        if let Some(delay) = request.human_delay {
            debug!("Delaying request to {} by {}ms", host, delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        let per_strategy = self.retry.attempts_per_strategy.max(1);
        let mut attempts = 0usize;
        let mut challenges = 0usize;
        let mut last_error: Option<TransportError> = None;

        for (index, planned) in plan(target).into_iter().enumerate() {
            if index > 0 && last_error.is_some() {
                tokio::time::sleep(self.retry.backoff).await;
            }

            for attempt in 1..=per_strategy {
                attempts += 1;
                let outcome = self.attempt(request, &planned.url).await;
                metrics::record_attempt(planned.strategy.name(), outcome.label());

                match outcome {
                    Outcome::Success(response) => {
                        info!(
                            "Upstream {} answered {} via {} (attempt {})",
                            planned.url,
                            response.status,
                            planned.strategy.name(),
                            attempts
                        );
                        self.classifier.record_success(&host);
                        return Ok(Fetched {
                            response,
                            strategy: planned.strategy,
                            attempts,
                            elapsed: start.elapsed(),
                        });
                    }
                    Outcome::Challenge(kind) => {
                        warn!(
                            "Challenge page from {} via {}: {:?}",
                            planned.url,
                            planned.strategy.name(),
                            kind
                        );
                        metrics::record_challenge();
                        self.classifier.record_challenge(&host);
                        challenges += 1;
                        break;
                    }
                    Outcome::Transport(err) => {
                        warn!(
                            "Upstream fetch failed for {} via {} (attempt {}/{}): {}",
                            planned.url,
                            planned.strategy.name(),
                            attempt,
                            per_strategy,
                            err
                        );
                        last_error = Some(err);
                        if attempt < per_strategy {
                            tokio::time::sleep(self.retry.backoff).await;
                        }
                    }
                }
            }
        }

        if challenges > 0 {
            return Err(ProxyError::UpstreamProtected {
                url: target.to_string(),
                attempts,
            });
        }
        Err(match last_error {
            Some(err) => ProxyError::Transport(err),
            None => ProxyError::Internal(format!("no fetch strategy applies to {target}")),
        })
    }

    async fn attempt(&self, request: &OutboundRequest, url: &Url) -> Outcome {
        let response = match self.transport.send(request, url).await {
            Ok(response) => response,
            Err(err) => return Outcome::Transport(err),
        };

        if let Some(kind) = challenge::detect_from_headers(response.status, &response.headers) {
            return Outcome::Challenge(kind);
        }
        if !challenge::needs_body(response.status, &response.headers) {
            return Outcome::Success(response);
        }

        let UpstreamResponse {
            status,
            headers,
            url: final_url,
            body,
        } = response;
        let bytes = match body.into_bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Outcome::Transport(err),
        };
        if let Some(kind) = challenge::detect_in_body(&headers, &bytes).await {
            return Outcome::Challenge(kind);
        }

        Outcome::Success(UpstreamResponse {
            status,
            headers,
            url: final_url,
            body: UpstreamBody::Buffered(bytes),
        })
    }
}
