//! Memoized "hardened host" classification.
//!
//! A host is hardened when it is likely to challenge automated clients. The
//! initial verdict comes from a curated heuristic; real exchanges then refine
//! it. Concurrent updates are last-write-wins.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Hosts known to front their media with bot mitigation.
const CURATED_HOSTS: &[&str] = &["challenges.cloudflare.com"];

/// Edge and serverless suffixes that commonly sit behind a challenge layer.
const HARDENED_SUFFIXES: &[&str] = &[
    ".workers.dev",
    ".pages.dev",
    ".trycloudflare.com",
    ".cdn.cloudflare.net",
];

/// Eviction policy for remembered verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    #[default]
    Unbounded,
    /// Least-recently-used entry is dropped once `capacity` is exceeded
    Lru { capacity: usize },
}

impl Eviction {
    /// `0` means unbounded.
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Eviction::Unbounded
        } else {
            Eviction::Lru { capacity }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Verdict {
    hardened: bool,
    last_used: u64,
}

#[derive(Debug, Clone)]
pub struct HostClassifier {
    entries: Arc<DashMap<String, Verdict>>,
    /// Operator-supplied hosts; a leading `.` matches any subdomain
    extra: Arc<HashSet<String>>,
    eviction: Eviction,
    tick: Arc<AtomicU64>,
}

impl Default for HostClassifier {
    fn default() -> Self {
        Self::new(Eviction::Unbounded, Vec::new())
    }
}

impl HostClassifier {
    pub fn new(eviction: Eviction, extra_hosts: Vec<String>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            extra: Arc::new(
                extra_hosts
                    .into_iter()
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect(),
            ),
            eviction,
            tick: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Heuristic verdict, independent of any observed exchange.
    fn is_known_hardened(&self, host: &str) -> bool {
        CURATED_HOSTS.contains(&host)
            || HARDENED_SUFFIXES.iter().any(|s| host.ends_with(s))
            || self.extra.contains(host)
            || self
                .extra
                .iter()
                .any(|e| e.starts_with('.') && host.ends_with(e.as_str()))
    }

    /// Whether `host` should get evasion headers and a human-like delay.
    pub fn classify(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let tick = self.next_tick();

        if let Some(mut verdict) = self.entries.get_mut(&host) {
            verdict.last_used = tick;
            debug!("Classifier HIT: {} hardened={}", host, verdict.hardened);
            return verdict.hardened;
        }

        let hardened = self.is_known_hardened(&host);
        debug!("Classifier MISS: {} hardened={}", host, hardened);
        self.store(host, hardened, tick);
        hardened
    }

    /// A clean exchange: hosts outside the curated lists are no longer treated as hardened.
    pub fn record_success(&self, host: &str) {
        let host = host.to_ascii_lowercase();
        let hardened = self.is_known_hardened(&host);
        let tick = self.next_tick();
        self.store(host, hardened, tick);
    }

    /// A challenge page was served: treat the host as hardened from now on.
    pub fn record_challenge(&self, host: &str) {
        let tick = self.next_tick();
        self.store(host.to_ascii_lowercase(), true, tick);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn store(&self, host: String, hardened: bool, tick: u64) {
        self.entries.insert(
            host,
            Verdict {
                hardened,
                last_used: tick,
            },
        );
        if let Eviction::Lru { capacity } = self.eviction {
            self.evict_over(capacity);
        }
    }

    fn evict_over(&self, capacity: usize) {
        while self.entries.len() > capacity {
            // Find the victim first; removing while iterating would deadlock the shard.
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_used)
                .map(|entry| entry.key().clone());
            match victim {
                Some(host) => {
                    debug!("Classifier EVICT: {}", host);
                    self.entries.remove(&host);
                }
                None => break,
            }
        }
    }
}
