//! Pull-based body streaming and playlist sniffing.

use axum::BoxError;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};

const PLAYLIST_SIGNATURE: &[u8] = b"#EXTM3U";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Wrap an upstream stream as a response body.
///
/// hyper polls the stream only when the connection can take more data, so at
/// most one chunk is held between upstream and client.
pub fn stream_body<S, E>(stream: S) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Body::from_stream(stream)
}

/// True when `prefix` begins with the playlist signature, ignoring a BOM and leading whitespace.
pub fn starts_with_signature(prefix: &[u8]) -> bool {
    let prefix = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
    let start = prefix
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    prefix[start..].starts_with(PLAYLIST_SIGNATURE)
}

/// Bytes held while waiting for a decisive prefix.
const MAX_SNIFF_BYTES: usize = 1024;

/// True once `prefix` is long enough for [`starts_with_signature`] to give a final answer.
fn prefix_is_decisive(prefix: &[u8]) -> bool {
    if prefix.len() >= MAX_SNIFF_BYTES {
        return true;
    }
    let prefix = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
    let significant = prefix
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .count();
    significant >= PLAYLIST_SIGNATURE.len()
}

/// Pull chunks off a stream until the leading bytes decide playlist detection,
/// then hand back those bytes and an equivalent stream that replays them.
///
/// Stops early at end of stream or on the first error, which is replayed too.
pub async fn peek_prefix<S, E>(
    mut stream: S,
) -> (Bytes, impl Stream<Item = Result<Bytes, E>> + Send + 'static)
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Send + 'static,
{
    let mut prefix = BytesMut::new();
    let mut head = Vec::new();
    while !prefix_is_decisive(&prefix) {
        match stream.next().await {
            Some(Ok(chunk)) => {
                prefix.extend_from_slice(&chunk);
                head.push(Ok(chunk));
            }
            Some(Err(err)) => {
                head.push(Err(err));
                break;
            }
            None => break,
        }
    }
    (prefix.freeze(), stream::iter(head).chain(stream))
}
