//! Line-oriented playlist rewriting.
//!
//! Works on the original text rather than re-serializing the parsed model, so
//! unknown tags, comments, ordering and line endings survive byte-for-byte.
//! Only URI tokens are replaced.

use super::attributes::quoted_uri_spans;
use super::parser::parse;
use super::policy::{RewritePolicy, is_data_url};
use super::resolve::resolve_url;
use super::tags::{Line, Tag};
use crate::metrics;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

static FALLBACK_MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https?://[^\s"']+\.(?:ts|m3u8|key|mp4|aac)(?:\?[^\s"']*)?)"#)
        .expect("fallback media pattern must compile")
});

static FALLBACK_URI_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).expect("fallback URI pattern must compile"));

/// Builds and recognizes proxied URIs of the form `{base}{path}?{param}={encoded target}`.
#[derive(Debug, Clone)]
pub struct ProxyUriBuilder {
    public_base: String,
    proxy_path: String,
    param: String,
}

impl ProxyUriBuilder {
    pub fn new(
        public_base: impl Into<String>,
        proxy_path: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            public_base: public_base.into().trim_end_matches('/').to_string(),
            proxy_path: proxy_path.into(),
            param: param.into(),
        }
    }

    fn prefix(&self) -> String {
        format!("{}{}?{}=", self.public_base, self.proxy_path, self.param)
    }

    /// Proxied form of an absolute target.
    pub fn build(&self, target: &str) -> String {
        format!("{}{}", self.prefix(), urlencoding::encode(target))
    }

    /// True when `uri` already routes through this proxy.
    pub fn is_proxied(&self, uri: &str) -> bool {
        let relative = format!("{}?{}=", self.proxy_path, self.param);
        uri.starts_with(&self.prefix()) || uri.starts_with(&relative)
    }

    /// Recover the absolute target from a proxied URI.
    pub fn decode(&self, proxied: &str) -> Option<String> {
        let prefix = self.prefix();
        let relative = format!("{}?{}=", self.proxy_path, self.param);
        let encoded = proxied
            .strip_prefix(prefix.as_str())
            .or_else(|| proxied.strip_prefix(relative.as_str()))?;
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        urlencoding::decode(encoded).ok().map(|s| s.into_owned())
    }
}

/// Rewrites playlist URIs so follow-up fetches come back through the proxy.
#[derive(Debug, Clone)]
pub struct PlaylistRewriter {
    policy: RewritePolicy,
    proxy: ProxyUriBuilder,
}

impl PlaylistRewriter {
    pub fn new(policy: RewritePolicy, proxy: ProxyUriBuilder) -> Self {
        Self { policy, proxy }
    }

    pub fn proxy(&self) -> &ProxyUriBuilder {
        &self.proxy
    }

    pub fn should_rewrite(&self, resolved: &str) -> bool {
        self.policy.should_rewrite(resolved)
    }

    /// Rewrite `content` fetched from `source_url`.
    ///
    /// Documents without the `#EXTM3U` signature go through a regex pass instead.
    pub fn rewrite(&self, content: &str, source_url: &str) -> String {
        let doc = parse(content, source_url);
        if !doc.is_valid {
            debug!("Playlist from {} lacks #EXTM3U, using fallback rewrite", source_url);
            metrics::record_rewrite("fallback");
            return self.fallback_rewrite(content, source_url);
        }

        debug!(
            "Rewriting {:?} playlist from {} ({} segments, {} variants)",
            doc.kind,
            source_url,
            doc.segments.len(),
            doc.variants.len()
        );
        metrics::record_rewrite("structured");

        let mut out = String::with_capacity(content.len() + content.len() / 2);
        let mut expect_variant = false;

        for piece in content.split_inclusive('\n') {
            let (line, ending) = split_line_ending(piece);
            match Line::classify(line) {
                Line::Blank => out.push_str(line),
                Line::Tag(Tag::StreamInf(_)) => {
                    expect_variant = true;
                    out.push_str(line);
                }
                Line::Tag(tag) if tag.has_uri_attributes() => {
                    out.push_str(&self.rewrite_uri_attributes(line, source_url));
                }
                Line::Tag(_) => out.push_str(line),
                Line::Uri(uri) => {
                    let force = std::mem::take(&mut expect_variant);
                    let start = line.len() - line.trim_start().len();
                    out.push_str(&line[..start]);
                    out.push_str(&self.rewrite_resource(uri, source_url, force));
                    out.push_str(&line[start + uri.len()..]);
                }
            }
            out.push_str(ending);
        }

        out
    }

    /// Proxy a resource line if the policy (or `force`) asks for it.
    fn rewrite_resource(&self, uri: &str, source_url: &str, force: bool) -> String {
        if self.proxy.is_proxied(uri) {
            return uri.to_string();
        }
        let resolved = resolve_url(uri, source_url);
        if self.policy.skip_data_urls && is_data_url(&resolved) {
            return uri.to_string();
        }
        if force || self.should_rewrite(&resolved) {
            self.proxied(&resolved)
        } else {
            uri.to_string()
        }
    }

    fn rewrite_uri_attributes(&self, line: &str, source_url: &str) -> String {
        let mut out = String::with_capacity(line.len() * 2);
        let mut cursor = 0;
        for span in quoted_uri_spans(line) {
            let value = &line[span.clone()];
            out.push_str(&line[cursor..span.start]);
            if self.proxy.is_proxied(value) || is_data_url(value) {
                out.push_str(value);
            } else {
                out.push_str(&self.proxied(&resolve_url(value, source_url)));
            }
            cursor = span.end;
        }
        out.push_str(&line[cursor..]);
        out
    }

    /// Regex pass for recognizable but malformed playlists.
    pub fn fallback_rewrite(&self, content: &str, source_url: &str) -> String {
        let pass = FALLBACK_MEDIA_URL.replace_all(content, |caps: &Captures| {
            let url = &caps[1];
            if self.proxy.is_proxied(url) {
                url.to_string()
            } else {
                self.proxied(url)
            }
        });

        FALLBACK_URI_ATTR
            .replace_all(&pass, |caps: &Captures| {
                let value = &caps[1];
                if self.proxy.is_proxied(value) || is_data_url(value) {
                    caps[0].to_string()
                } else {
                    format!("URI=\"{}\"", self.proxied(&resolve_url(value, source_url)))
                }
            })
            .into_owned()
    }

    fn proxied(&self, resolved: &str) -> String {
        if self.policy.preserve_query_params {
            self.proxy.build(resolved)
        } else {
            let without_query = resolved.split('?').next().unwrap_or(resolved);
            self.proxy.build(without_query)
        }
    }
}

fn split_line_ending(piece: &str) -> (&str, &str) {
    if let Some(line) = piece.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = piece.strip_suffix('\n') {
        (line, "\n")
    } else {
        (piece, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cdn.example/path/playlist.m3u8";

    fn rewriter() -> PlaylistRewriter {
        PlaylistRewriter::new(RewritePolicy::default(), ProxyUriBuilder::new("", "/o", "u"))
    }

    #[test]
    fn media_playlist_scenario() {
        let input = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:9.009,\nseg1.ts\n#EXT-X-ENDLIST";
        let output = rewriter().rewrite(input, BASE);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-TARGETDURATION:10");
        assert_eq!(lines[2], "#EXTINF:9.009,");
        assert_eq!(lines[3], "/o?u=https%3A%2F%2Fcdn.example%2Fpath%2Fseg1.ts");
        assert_eq!(lines[4], "#EXT-X-ENDLIST");
        assert!(!output.ends_with('\n'));
    }

    #[test]
    fn round_trip_recovers_resolved_uri() {
        let rw = rewriter();
        let input = "#EXTM3U\n#EXTINF:4,\n../seg 1.ts?a=1&b=2\n#EXTINF:4,\n//edge.example/x.ts\n";
        let output = rw.rewrite(input, BASE);
        let originals = ["../seg 1.ts?a=1&b=2", "//edge.example/x.ts"];
        let rewritten: Vec<&str> = output.lines().filter(|l| !l.starts_with('#')).collect();

        for (original, proxied) in originals.iter().zip(rewritten) {
            assert_eq!(rw.proxy().decode(proxied).unwrap(), resolve_url(original, BASE));
        }
    }

    #[test]
    fn rewriting_twice_is_idempotent() {
        let rw = rewriter();
        let input = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
#EXT-X-MAP:URI=\"init.mp4\"\n\
#EXTINF:4,\nseg1.ts\n";
        let once = rw.rewrite(input, BASE);
        let twice = rw.rewrite(&once, BASE);
        assert_eq!(once, twice);
        assert_eq!(once.matches("/o?u=").count(), 3);
    }

    #[test]
    fn idempotent_with_absolute_public_base() {
        let rw = PlaylistRewriter::new(
            RewritePolicy::default(),
            ProxyUriBuilder::new("https://relay.example/", "/o", "url"),
        );
        let once = rw.rewrite("#EXTM3U\n#EXTINF:4,\nseg1.ts\n", BASE);
        assert!(once.contains("https://relay.example/o?url=https%3A%2F%2Fcdn.example"));
        assert_eq!(rw.rewrite(&once, BASE), once);
        assert_eq!(rw.fallback_rewrite(&once, BASE), once);
    }

    #[test]
    fn key_and_map_uris_rewritten_data_skipped() {
        let input = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"https://k/key1\",IV=0x10\n\
#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"data:text/plain;base64,AAAA\"\n\
#EXT-X-MAP:URI=\"init.mp4\",BYTERANGE=\"720@0\"\n";
        let output = rewriter().rewrite(input, BASE);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[1], "#EXT-X-KEY:METHOD=AES-128,URI=\"/o?u=https%3A%2F%2Fk%2Fkey1\",IV=0x10");
        assert_eq!(lines[2], "#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"data:text/plain;base64,AAAA\"");
        assert_eq!(
            lines[3],
            "#EXT-X-MAP:URI=\"/o?u=https%3A%2F%2Fcdn.example%2Fpath%2Finit.mp4\",BYTERANGE=\"720@0\""
        );
    }

    #[test]
    fn variants_always_rewritten() {
        let input = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nhd/playlist\n";
        let output = rewriter().rewrite(input, BASE);
        assert!(output.contains("/o?u=https%3A%2F%2Fcdn.example%2Fpath%2Fhd%2Fplaylist\n"));
    }

    #[test]
    fn non_matching_resources_untouched() {
        let input = "#EXTM3U\n#EXTINF:4,\nseg1.m4s\n# comment with seg.ts\n#EXT-X-DATERANGE:ID=\"x\"\n";
        let output = rewriter().rewrite(input, BASE);
        assert_eq!(output, input);
    }

    #[test]
    fn preserves_whitespace_and_crlf() {
        let input = "#EXTM3U\r\n#EXTINF:4,\r\n  seg1.ts  \r\n\r\n";
        let output = rewriter().rewrite(input, BASE);
        assert_eq!(
            output,
            "#EXTM3U\r\n#EXTINF:4,\r\n  /o?u=https%3A%2F%2Fcdn.example%2Fpath%2Fseg1.ts  \r\n\r\n"
        );
    }

    #[test]
    fn ll_hls_and_media_tags_rewritten() {
        let input = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",NAME=\"en\",URI=\"audio.m3u8\"\n\
#EXT-X-PART:DURATION=0.33,URI=\"part1.mp4\"\n\
#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"part2.mp4\"\n\
#EXT-X-RENDITION-REPORT:URI=\"../low/index.m3u8\",LAST-MSN=4\n";
        let output = rewriter().rewrite(input, BASE);
        assert_eq!(output.matches("URI=\"/o?u=https%3A%2F%2Fcdn.example%2F").count(), 4);
        assert!(output.contains("%2Flow%2Findex.m3u8\",LAST-MSN=4"));
    }

    #[test]
    fn query_dropped_when_not_preserved() {
        let rw = PlaylistRewriter::new(
            RewritePolicy::default().with_preserve_query_params(false),
            ProxyUriBuilder::new("", "/o", "u"),
        );
        let output = rw.rewrite("#EXTM3U\n#EXTINF:4,\nseg1.ts?token=abc\n", BASE);
        assert!(output.contains("/o?u=https%3A%2F%2Fcdn.example%2Fpath%2Fseg1.ts\n"));
    }

    #[test]
    fn fallback_rewrites_malformed_playlists() {
        let input = "#EXTINF:4,\nhttps://cdn.example/a.ts\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"data:abc\"\n";
        let output = rewriter().rewrite(input, BASE);
        assert!(output.contains("\n/o?u=https%3A%2F%2Fcdn.example%2Fa.ts\n"));
        assert!(output.contains("URI=\"/o?u=https%3A%2F%2Fcdn.example%2Fpath%2Fk.key\""));
        assert!(output.contains("URI=\"data:abc\""));
    }

    #[test]
    fn decode_rejects_foreign_uris() {
        let builder = ProxyUriBuilder::new("", "/o", "u");
        assert!(builder.decode("https://cdn.example/a.ts").is_none());
        assert_eq!(
            builder.decode("/o?u=https%3A%2F%2Fa%2Fb.ts").as_deref(),
            Some("https://a/b.ts")
        );
    }
}
