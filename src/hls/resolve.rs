use url::Url;

/// True for URIs that are used as-is without resolution.
pub fn is_absolute(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
}

/// Resolve a playlist reference against the playlist's own URL.
///
/// - `http(s)://` and `data:` URIs pass through untouched.
/// - `//host/path` inherits the base scheme.
/// - `/path` inherits the base origin.
/// - Anything else is joined onto the base directory (up to the last `/`).
///
/// A base that does not parse, or a join that fails, yields `uri` unchanged.
pub fn resolve_url(uri: &str, base: &str) -> String {
    if uri.is_empty() || is_absolute(uri) {
        return uri.to_string();
    }

    let Ok(base) = Url::parse(base) else {
        return uri.to_string();
    };
    if !base.has_host() {
        return uri.to_string();
    }

    if uri.starts_with("//") {
        return format!("{}:{}", base.scheme(), uri);
    }

    let origin = base.origin().ascii_serialization();
    if uri.starts_with('/') {
        return format!("{origin}{uri}");
    }

    let path = base.path();
    let dir = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };

    Url::parse(&format!("{origin}{dir}"))
        .and_then(|dir_url| dir_url.join(uri))
        .map(String::from)
        .unwrap_or_else(|_| uri.to_string())
}
