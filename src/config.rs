use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default request-body ceiling for non-GET proxied requests (10 MiB).
pub const DEFAULT_MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Prefix for proxied URIs written into playlists. Empty keeps them host-relative.
    pub public_base_url: String,
    /// Path of the proxy endpoint, e.g. `/o`
    pub proxy_path: String,
    /// Query parameter carrying the target in rewritten URIs (`u` or `url`)
    pub proxy_query_param: String,
    /// Skip upstream certificate verification when no trust bundle is loaded
    pub tls_skip_verify: bool,
    /// Directory of `.pem`/`.crt`/`.cer` files read at startup
    pub ca_cert_dir: Option<String>,
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    pub attempts_per_strategy: u32,
    pub strategy_backoff: Duration,
    pub human_delay_min: Duration,
    pub human_delay_max: Duration,
    pub playlist_cache_control: String,
    pub segment_cache_control: String,
    pub preserve_query_params: bool,
    /// Max hosts remembered by the classifier; 0 means unbounded
    pub classifier_max_hosts: usize,
    /// Extra hostnames treated as hardened
    pub hardened_hosts: Vec<String>,
    /// Reject targets that are private or reserved IP literals
    pub block_private_targets: bool,
    pub max_request_body_bytes: usize,
    pub max_redirects: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            is_dev: true,
            public_base_url: String::new(),
            proxy_path: "/o".to_string(),
            proxy_query_param: "u".to_string(),
            tls_skip_verify: false,
            ca_cert_dir: None,
            upstream_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(20),
            attempts_per_strategy: 1,
            strategy_backoff: Duration::from_millis(250),
            human_delay_min: Duration::from_millis(500),
            human_delay_max: Duration::from_millis(1500),
            playlist_cache_control: "no-cache".to_string(),
            segment_cache_control: "public, max-age=3600".to_string(),
            preserve_query_params: true,
            classifier_max_hosts: 0,
            hardened_hosts: Vec::new(),
            block_private_targets: false,
            max_request_body_bytes: DEFAULT_MAX_REQUEST_BODY_BYTES,
            max_redirects: 5,
        }
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn parse_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::error::Error + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().parse()?),
        _ => Ok(default),
    }
}

fn flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        let is_dev = flag("DEV_MODE", false);

        // Port: required in prod, defaults to 4000 in dev
        let port = if is_dev {
            parse_or("PORT", defaults.port)?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_default();

        let mut proxy_path = env::var("PROXY_PATH").unwrap_or(defaults.proxy_path);
        if !proxy_path.starts_with('/') {
            proxy_path.insert(0, '/');
        }
        let proxy_path = match proxy_path.trim_end_matches('/') {
            "" => return Err("PROXY_PATH must not be the root path".into()),
            "/health" | "/metrics" => {
                return Err(format!("PROXY_PATH {proxy_path} collides with a built-in route").into());
            }
            trimmed => trimmed.to_string(),
        };

        let proxy_query_param = match env::var("PROXY_QUERY_PARAM")
            .unwrap_or(defaults.proxy_query_param)
            .to_lowercase()
            .as_str()
        {
            "url" => "url".to_string(),
            _ => "u".to_string(),
        };

        let human_delay_min =
            Duration::from_millis(parse_or("HUMAN_DELAY_MIN_MS", 500u64)?);
        let human_delay_max =
            Duration::from_millis(parse_or("HUMAN_DELAY_MAX_MS", 1500u64)?).max(human_delay_min);

        let hardened_hosts = env::var("HARDENED_HOSTS")
            .map(|raw| {
                raw.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            port,
            is_dev,
            public_base_url,
            proxy_path,
            proxy_query_param,
            tls_skip_verify: flag("TLS_SKIP_VERIFY", false),
            ca_cert_dir: env::var("CA_CERT_DIR").ok().filter(|d| !d.trim().is_empty()),
            upstream_timeout: Duration::from_secs(parse_or("UPSTREAM_TIMEOUT_SECS", 45u64)?),
            connect_timeout: Duration::from_secs(parse_or("CONNECT_TIMEOUT_SECS", 20u64)?),
            attempts_per_strategy: parse_or("ATTEMPTS_PER_STRATEGY", 1u32)?.max(1),
            strategy_backoff: Duration::from_millis(parse_or("STRATEGY_BACKOFF_MS", 250u64)?),
            human_delay_min,
            human_delay_max,
            playlist_cache_control: env::var("PLAYLIST_CACHE_CONTROL")
                .unwrap_or(defaults.playlist_cache_control),
            segment_cache_control: env::var("SEGMENT_CACHE_CONTROL")
                .unwrap_or(defaults.segment_cache_control),
            preserve_query_params: flag("PRESERVE_QUERY_PARAMS", true),
            classifier_max_hosts: parse_or("CLASSIFIER_MAX_HOSTS", 0usize)?,
            hardened_hosts,
            block_private_targets: flag("BLOCK_PRIVATE_TARGETS", false),
            max_request_body_bytes: parse_or(
                "MAX_REQUEST_BODY_BYTES",
                DEFAULT_MAX_REQUEST_BODY_BYTES,
            )?,
            max_redirects: parse_or("MAX_REDIRECTS", 5usize)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "DEV_MODE",
        "PORT",
        "PUBLIC_BASE_URL",
        "PROXY_PATH",
        "PROXY_QUERY_PARAM",
        "TLS_SKIP_VERIFY",
        "CA_CERT_DIR",
        "UPSTREAM_TIMEOUT_SECS",
        "CONNECT_TIMEOUT_SECS",
        "ATTEMPTS_PER_STRATEGY",
        "STRATEGY_BACKOFF_MS",
        "HUMAN_DELAY_MIN_MS",
        "HUMAN_DELAY_MAX_MS",
        "PLAYLIST_CACHE_CONTROL",
        "SEGMENT_CACHE_CONTROL",
        "PRESERVE_QUERY_PARAMS",
        "CLASSIFIER_MAX_HOSTS",
        "HARDENED_HOSTS",
        "BLOCK_PRIVATE_TARGETS",
        "MAX_REQUEST_BODY_BYTES",
        "MAX_REDIRECTS",
    ];

    /// Clear every config var, set `set`, run `f`, then restore original state.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK, no other thread modifies env vars concurrently.
            unsafe { env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { env::set_var(k, v) },
                None => unsafe { env::remove_var(k) },
            }
        }
    }

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.port, 4000);
            assert_eq!(config.proxy_path, "/o");
            assert_eq!(config.proxy_query_param, "u");
            assert_eq!(config.public_base_url, "");
            assert!(!config.tls_skip_verify);
            assert_eq!(config.upstream_timeout, Duration::from_secs(45));
            assert_eq!(config.human_delay_min, Duration::from_millis(500));
            assert_eq!(config.human_delay_max, Duration::from_millis(1500));
            assert_eq!(config.playlist_cache_control, "no-cache");
            assert!(config.preserve_query_params);
            assert_eq!(config.classifier_max_hosts, 0);
        });
    }

    #[test]
    fn prod_mode_requires_port() {
        with_env(&[], || {
            let result = Config::from_env();
            assert!(result.is_err(), "Should fail without PORT in prod mode");
        });
    }

    #[test]
    fn prod_mode_with_port_succeeds() {
        with_env(&[("PORT", "8080")], || {
            let config = Config::from_env().unwrap();
            assert!(!config.is_dev);
            assert_eq!(config.port, 8080);
        });
    }

    #[test]
    fn invalid_number_is_an_error() {
        with_env(
            &[("DEV_MODE", "true"), ("UPSTREAM_TIMEOUT_SECS", "soon")],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn proxy_path_is_normalized() {
        with_env(&[("DEV_MODE", "true"), ("PROXY_PATH", "proxy/")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.proxy_path, "/proxy");
        });
    }

    #[test]
    fn root_proxy_path_rejected() {
        with_env(&[("DEV_MODE", "true"), ("PROXY_PATH", "/")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn builtin_route_proxy_path_rejected() {
        with_env(&[("DEV_MODE", "true"), ("PROXY_PATH", "/health/")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn url_query_param_selected() {
        with_env(
            &[("DEV_MODE", "true"), ("PROXY_QUERY_PARAM", "URL")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.proxy_query_param, "url");
            },
        );
    }

    #[test]
    fn hardened_hosts_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("HARDENED_HOSTS", " Streams.Example , ,cdn.test"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.hardened_hosts, vec!["streams.example", "cdn.test"]);
            },
        );
    }

    #[test]
    fn human_delay_max_never_below_min() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("HUMAN_DELAY_MIN_MS", "800"),
                ("HUMAN_DELAY_MAX_MS", "100"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.human_delay_max, Duration::from_millis(800));
            },
        );
    }

    #[test]
    fn public_base_url_trailing_slash_trimmed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("PUBLIC_BASE_URL", "https://relay.example/"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.public_base_url, "https://relay.example");
            },
        );
    }

    #[test]
    fn tls_skip_verify_flag() {
        with_env(&[("DEV_MODE", "true"), ("TLS_SKIP_VERIFY", "1")], || {
            let config = Config::from_env().unwrap();
            assert!(config.tls_skip_verify);
        });
    }
}
