//! Undo HTTP content-coding on a fully read body.

use async_compression::tokio::bufread::{
    BrotliDecoder, DeflateDecoder, GzipDecoder, ZlibDecoder, ZstdDecoder,
};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content-encoding: {0}")]
    Unsupported(String),

    #[error("failed to decode {encoding} body: {source}")]
    Corrupt {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentCoding {
    fn parse(token: &str) -> Result<Option<Self>, DecodeError> {
        match token.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(None),
            "gzip" | "x-gzip" => Ok(Some(ContentCoding::Gzip)),
            "deflate" => Ok(Some(ContentCoding::Deflate)),
            "br" => Ok(Some(ContentCoding::Brotli)),
            "zstd" => Ok(Some(ContentCoding::Zstd)),
            other => Err(DecodeError::Unsupported(other.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Brotli => "br",
            ContentCoding::Zstd => "zstd",
        }
    }
}

/// Codings listed in a `content-encoding` header, in the order they were applied.
pub fn parse_codings(header: &str) -> Result<Vec<ContentCoding>, DecodeError> {
    let mut codings = Vec::new();
    for token in header.split(',') {
        if let Some(coding) = ContentCoding::parse(token)? {
            codings.push(coding);
        }
    }
    Ok(codings)
}

/// True when the header names anything other than identity.
pub fn is_encoded(header: Option<&str>) -> bool {
    header.is_some_and(|h| {
        h.split(',')
            .any(|t| !matches!(t.trim().to_ascii_lowercase().as_str(), "" | "identity"))
    })
}

async fn read_all<R: AsyncRead + Unpin>(
    mut reader: R,
    coding: ContentCoding,
) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .await
        .map_err(|source| DecodeError::Corrupt {
            encoding: coding.name(),
            source,
        })?;
    Ok(out)
}

async fn decode_one(coding: ContentCoding, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    match coding {
        ContentCoding::Gzip => read_all(GzipDecoder::new(data), coding).await,
        ContentCoding::Brotli => read_all(BrotliDecoder::new(data), coding).await,
        ContentCoding::Zstd => read_all(ZstdDecoder::new(data), coding).await,
        // "deflate" is zlib-wrapped per RFC 9110, but raw deflate is common in the wild
        ContentCoding::Deflate => match read_all(ZlibDecoder::new(data), coding).await {
            Ok(out) => Ok(out),
            Err(_) => read_all(DeflateDecoder::new(data), coding).await,
        },
    }
}

/// Decode `data` according to a `content-encoding` header value.
pub async fn decode_body(header: &str, data: &[u8]) -> Result<Bytes, DecodeError> {
    let codings = parse_codings(header)?;
    let mut current = data.to_vec();
    for coding in codings.into_iter().rev() {
        current = decode_one(coding, &current).await?;
    }
    Ok(Bytes::from(current))
}
