//! Turning an upstream response into the client response.
//!
//! Headers go through a single allowlist. Compressed bodies are decoded in
//! memory, playlists are rewritten, and everything else is streamed chunk
//! by chunk with backpressure.

pub mod body;
pub mod decode;
pub mod headers;

use crate::error::{ProxyError, Result};
use crate::hls::PlaylistRewriter;
use crate::metrics;
use crate::upstream::transport::TransportErrorKind;
use crate::upstream::{Fetched, UpstreamBody, UpstreamResponse};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use body::{peek_prefix, starts_with_signature, stream_body};
use bytes::Bytes;
use decode::{decode_body, is_encoded};
use tracing::{debug, warn};
use url::Url;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Extensions served with the long-lived segment cache policy.
const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s", "mp4", "m4v", "m4a", "aac", "mp3", "webm"];

/// Chunked segment types that cannot be range-requested through the relay.
const NO_RANGE_EXTENSIONS: &[&str] = &["ts", "m4s"];

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub playlist_cache_control: String,
    pub segment_cache_control: String,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            playlist_cache_control: "no-cache".to_string(),
            segment_cache_control: "public, max-age=3600".to_string(),
        }
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "m3u8" => PLAYLIST_CONTENT_TYPE,
        "ts" => "video/mp2t",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "m4s" => "video/iso.segment",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "vtt" => "text/vtt",
        "key" => "application/octet-stream",
        _ => return None,
    })
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn is_playlist_mime(content_type: &str) -> bool {
    content_type.contains("mpegurl")
}

/// Content types that say nothing about the payload, so the body is sniffed.
fn is_generic_mime(content_type: &str) -> bool {
    content_type.starts_with("text/plain")
        || content_type.starts_with("application/octet-stream")
        || content_type.starts_with("binary/octet-stream")
}

/// A playlist file name on the URL or in `content-disposition`.
///
/// Object stores often serve playlists with an unrelated content type, so a
/// named `.m3u8` makes the body worth sniffing whatever the type says.
fn named_as_playlist(url: &Url, headers: &HeaderMap) -> bool {
    extension(url).as_deref() == Some("m3u8")
        || headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains(".m3u8"))
}

/// Build the client response for a fetched upstream resource.
pub async fn relay(
    fetched: Fetched,
    rewriter: &PlaylistRewriter,
    options: &RelayOptions,
) -> Result<Response> {
    let Fetched {
        response, elapsed, ..
    } = fetched;
    let UpstreamResponse {
        status,
        headers: upstream_headers,
        url,
        body,
    } = response;

    let mut headers = headers::filter(&upstream_headers);
    headers::stamp(&mut headers, elapsed);

    let content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);
    let declared_playlist = content_type.as_deref().is_some_and(is_playlist_mime);
    let sniffable = content_type.as_deref().is_none_or(is_generic_mime)
        || named_as_playlist(&url, &upstream_headers);
    let encoding = upstream_headers.get(header::CONTENT_ENCODING).cloned();
    let encoding_str = encoding.as_ref().and_then(|v| v.to_str().ok());

    if is_encoded(encoding_str) {
        let raw = read_body(body).await?;
        let coding = encoding_str.unwrap_or_default();
        return match decode_body(coding, &raw).await {
            Ok(decoded) => {
                debug!("Decoded {} body from {} ({} → {} bytes)", coding, url, raw.len(), decoded.len());
                headers.remove(header::CONTENT_LENGTH);
                if declared_playlist || (sniffable && starts_with_signature(&decoded)) {
                    Ok(playlist_response(status, headers, decoded, &url, rewriter, options))
                } else {
                    Ok(media_response(status, headers, Body::from(decoded), &url, options))
                }
            }
            Err(e) => {
                warn!("Relaying undecoded body from {}: {}", url, e);
                metrics::record_decode_failure();
                if let Some(value) = encoding {
                    headers.insert(header::CONTENT_ENCODING, value);
                }
                Ok(media_response(status, headers, Body::from(raw), &url, options))
            }
        };
    }

    match body {
        UpstreamBody::Buffered(bytes) => {
            if declared_playlist || (sniffable && starts_with_signature(&bytes)) {
                Ok(playlist_response(status, headers, bytes, &url, rewriter, options))
            } else {
                Ok(media_response(status, headers, Body::from(bytes), &url, options))
            }
        }
        UpstreamBody::Streaming(stream) if declared_playlist => {
            let bytes = read_body(UpstreamBody::Streaming(stream)).await?;
            Ok(playlist_response(status, headers, bytes, &url, rewriter, options))
        }
        UpstreamBody::Streaming(stream) if sniffable => {
            let (prefix, rest) = peek_prefix(stream).await;
            if starts_with_signature(&prefix) {
                let bytes = read_body(UpstreamBody::from_stream(rest)).await?;
                Ok(playlist_response(status, headers, bytes, &url, rewriter, options))
            } else {
                Ok(media_response(status, headers, stream_body(rest), &url, options))
            }
        }
        UpstreamBody::Streaming(stream) => {
            Ok(media_response(status, headers, stream_body(stream), &url, options))
        }
    }
}

async fn read_body(body: UpstreamBody) -> Result<Bytes> {
    body.into_bytes().await.map_err(|e| match e.kind {
        TransportErrorKind::Timeout => ProxyError::Transport(e),
        _ => ProxyError::UpstreamBody(e.to_string()),
    })
}

fn playlist_response(
    status: StatusCode,
    mut headers: HeaderMap,
    bytes: Bytes,
    url: &Url,
    rewriter: &PlaylistRewriter,
    options: &RelayOptions,
) -> Response {
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("Playlist from {} is not valid UTF-8, relaying unmodified: {}", url, e);
            return media_response(status, headers, Body::from(bytes), url, options);
        }
    };

    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let rewritten = rewriter.rewrite(text, url.as_str());

    // Length and validators described the upstream bytes, not ours
    for name in [
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
        header::ETAG,
    ] {
        headers.remove(name);
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PLAYLIST_CONTENT_TYPE),
    );
    if let Ok(value) = HeaderValue::from_str(&options.playlist_cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    build(status, headers, Body::from(rewritten))
}

fn media_response(
    status: StatusCode,
    mut headers: HeaderMap,
    body: Body,
    url: &Url,
    options: &RelayOptions,
) -> Response {
    let ext = extension(url);
    let ext = ext.as_deref();

    if !headers.contains_key(header::CONTENT_TYPE)
        && let Some(mime) = ext.and_then(mime_for_extension)
    {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    }

    if ext.is_some_and(|e| SEGMENT_EXTENSIONS.contains(&e))
        && let Ok(value) = HeaderValue::from_str(&options.segment_cache_control)
    {
        headers.insert(header::CACHE_CONTROL, value);
    }

    if ext.is_some_and(|e| NO_RANGE_EXTENSIONS.contains(&e)) {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
    } else if !headers.contains_key(header::ACCEPT_RANGES) {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }

    build(status, headers, body)
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
