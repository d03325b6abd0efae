//! HTTP(S) implementation of RangeReader.
//!
//! Random access is served through `Range: bytes=a-b` requests. Some origin
//! servers do not advertise `Accept-Ranges: bytes`; against those the reader
//! downloads the whole resource once into a temporary file on first read and
//! serves all subsequent reads from it. The temporary file is removed when
//! the reader is dropped, which covers both completion and cancellation.

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::IoError;

use super::{FileRangeReader, RangeReader};

/// Basic-auth credentials for the origin server.
#[derive(Debug, Clone)]
pub struct HttpCredentials {
    pub username: String,
    pub secret: String,
}

/// Whole resource buffered to disk for servers without range support.
struct BufferedBody {
    // Held for its Drop: deletes the file when the reader goes away.
    _staging: tempfile::NamedTempFile,
    reader: FileRangeReader,
}

/// HTTP(S)-backed implementation of RangeReader.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    credentials: Option<HttpCredentials>,
    size: u64,
    supports_ranges: bool,
    buffered: OnceCell<BufferedBody>,
    identifier: String,
}

impl HttpRangeReader {
    /// Open a resource with a HEAD request.
    ///
    /// Captures the content length and whether the server accepts byte
    /// ranges. Returns `IoError::NotFound` / `IoError::AccessDenied` for the
    /// corresponding HTTP statuses.
    pub async fn open(
        client: Client,
        url: String,
        credentials: Option<HttpCredentials>,
    ) -> Result<Self, IoError> {
        let mut request = client.head(&url);
        if let Some(ref creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(IoError::NotFound(url));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(IoError::AccessDenied(url));
            }
            s if !s.is_success() => {
                return Err(IoError::Upstream(format!("{}: HTTP {}", url, s)));
            }
            _ => {}
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let supports_ranges = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        if !supports_ranges {
            debug!(url = %url, "origin does not accept byte ranges, will buffer");
        }

        Ok(Self {
            client,
            identifier: url.clone(),
            url,
            credentials,
            size,
            supports_ranges,
            buffered: OnceCell::new(),
        })
    }

    /// Peek at the response Content-Type without opening a reader.
    pub async fn head_content_type(
        client: &Client,
        url: &str,
        credentials: Option<&HttpCredentials>,
    ) -> Result<Option<String>, IoError> {
        let mut request = client.head(url);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.secret));
        }
        let response = request
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(IoError::NotFound(url.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(IoError::AccessDenied(url.to_string()))
            }
            _ => {}
        }

        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()))
    }

    /// Fetch a byte range with a ranged GET.
    async fn fetch_range(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset + len as u64 - 1;
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={}-{}", offset, end));
        if let Some(ref creds) = self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IoError::Upstream(format!(
                "{}: HTTP {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        if body.len() < len {
            return Err(IoError::Upstream(format!(
                "short range response: wanted {} bytes, got {}",
                len,
                body.len()
            )));
        }

        // Tolerate servers that ignore Range and send the full body.
        if body.len() > len {
            return Ok(body.slice(0..len));
        }
        Ok(body)
    }

    /// Download the whole resource into a temporary file, once.
    async fn ensure_buffered(&self) -> Result<&BufferedBody, IoError> {
        self.buffered
            .get_or_try_init(|| async {
                debug!(url = %self.url, size = self.size, "buffering full resource");

                let mut request = self.client.get(&self.url);
                if let Some(ref creds) = self.credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.secret));
                }
                let mut response = request
                    .send()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(IoError::Upstream(format!(
                        "{}: HTTP {}",
                        self.url,
                        response.status()
                    )));
                }

                let mut staging =
                    tempfile::NamedTempFile::new().map_err(|e| IoError::Upstream(e.to_string()))?;
                while let Some(chunk) = response
                    .chunk()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?
                {
                    staging
                        .write_all(&chunk)
                        .map_err(|e| IoError::Upstream(e.to_string()))?;
                }
                staging
                    .flush()
                    .map_err(|e| IoError::Upstream(e.to_string()))?;

                let reader = FileRangeReader::open(staging.path()).await?;
                Ok(BufferedBody {
                    _staging: staging,
                    reader,
                })
            })
            .await
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        if self.size > 0 && offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        if self.supports_ranges {
            self.fetch_range(offset, len).await
        } else {
            let buffered = self.ensure_buffered().await?;
            buffered.reader.read_exact_at(offset, len).await
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Tests
// =============================================================================
