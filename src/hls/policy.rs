use regex::Regex;
use std::sync::LazyLock;

/// One eligibility rule: URIs matching `pattern` are rewritten when `rewrite` is true.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub pattern: Regex,
    pub rewrite: bool,
}

static DEFAULT_RULES: LazyLock<Vec<RewriteRule>> = LazyLock::new(|| {
    [
        r"(?i)\.ts(?:\?.*)?$",
        r"(?i)\.key(?:\?.*)?$",
        r"(?i)\.m3u8(?:\?.*)?$",
        r"(?i)\.mp4(?:\?.*)?$",
        r"(?i)\.aac(?:\?.*)?$",
        r"(?i)/(?:segment|chunk)/",
    ]
    .into_iter()
    .map(|p| RewriteRule {
        pattern: Regex::new(p).expect("built-in rewrite pattern must compile"),
        rewrite: true,
    })
    .collect()
});

/// Decides which resource lines of a playlist get routed back through the proxy.
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    rules: Vec<RewriteRule>,
    pub preserve_query_params: bool,
    pub skip_data_urls: bool,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
            preserve_query_params: true,
            skip_data_urls: true,
        }
    }
}

impl RewritePolicy {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Build a policy from `(pattern, rewrite)` pairs.
    pub fn from_patterns(patterns: &[(&str, bool)]) -> Result<Self, regex::Error> {
        let rules = patterns
            .iter()
            .map(|(p, rewrite)| {
                Ok(RewriteRule {
                    pattern: Regex::new(p)?,
                    rewrite: *rewrite,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self::new(rules))
    }

    pub fn with_preserve_query_params(mut self, preserve: bool) -> Self {
        self.preserve_query_params = preserve;
        self
    }

    /// First matching rule wins; no match means leave the URI alone.
    pub fn should_rewrite(&self, resolved: &str) -> bool {
        if self.skip_data_urls && is_data_url(resolved) {
            return false;
        }
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(resolved))
            .is_some_and(|rule| rule.rewrite)
    }
}

pub fn is_data_url(uri: &str) -> bool {
    uri.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}
