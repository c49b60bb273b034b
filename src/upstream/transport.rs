//! The network seam: one request out, one response (or classified error) back.

use super::request::OutboundRequest;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::{Client, StatusCode, header::HeaderMap};
use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Tls,
    Dns,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection refused",
            TransportErrorKind::Tls => "tls failure",
            TransportErrorKind::Dns => "dns failure",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(name)
    }
}

/// A failed exchange with the upstream, classified for status mapping.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify_reqwest_error(&err);
        TransportError::new(kind, error_chain(&err))
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportErrorKind::Connect,
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        source = cause.source();
    }

    // Causes only; the top-level message embeds the URL
    let chain = err
        .source()
        .map(error_chain)
        .unwrap_or_default()
        .to_lowercase();
    if ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|m| chain.contains(m))
    {
        TransportErrorKind::Tls
    } else if ["dns", "failed to lookup", "name or service not known", "no such host"]
        .iter()
        .any(|m| chain.contains(m))
    {
        TransportErrorKind::Dns
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Response body as received: either already read (for inspection) or still on the wire.
pub enum UpstreamBody {
    Buffered(Bytes),
    Streaming(ByteStream),
}

impl UpstreamBody {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        UpstreamBody::Streaming(Box::pin(stream))
    }

    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, TransportError> {
        match self {
            UpstreamBody::Buffered(bytes) => Ok(bytes),
            UpstreamBody::Streaming(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            UpstreamBody::Buffered(bytes) => Box::pin(stream::once(async move { Ok(bytes) })),
            UpstreamBody::Streaming(stream) => stream,
        }
    }
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            UpstreamBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Final URL after redirects
    pub url: Url,
    pub body: UpstreamBody,
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(
        &self,
        request: &OutboundRequest,
        url: &Url,
    ) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed transport. `timeout` bounds the wait for headers and every
/// gap between body chunks.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        url: &Url,
    ) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let token = CancellationToken::new();
        let watchdog = {
            let token = token.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        // Dropping the send future on cancellation aborts the in-flight connection.
        let result = tokio::select! {
            _ = token.cancelled() => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("no response from {} within {}s", url, self.timeout.as_secs_f32()),
            )),
            response = builder.send() => response.map_err(TransportError::from),
        };
        watchdog.abort();

        let response = result?;
        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let chunks: ByteStream = Box::pin(response.bytes_stream().map_err(TransportError::from));
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Streaming(with_idle_timeout(chunks, self.timeout, final_url.clone())),
            url: final_url,
        })
    }
}

/// End `chunks` with a timeout error when no chunk arrives within `idle`.
///
/// The inner stream is dropped on the first error, closing the connection.
fn with_idle_timeout(chunks: ByteStream, idle: Duration, url: Url) -> ByteStream {
    Box::pin(stream::unfold(Some(chunks), move |state| {
        let url = url.clone();
        async move {
            let mut chunks = state?;
            match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(chunks))),
                Ok(Some(Err(err))) => Some((Err(err), None)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(TransportError::new(
                        TransportErrorKind::Timeout,
                        format!("body from {} stalled for {}s", url, idle.as_secs_f32()),
                    )),
                    None,
                )),
            }
        }
    }))
}
