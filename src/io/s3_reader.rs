//! Object-store implementation of RangeReader.
//!
//! Reads byte ranges from objects in S3 or any S3-compatible store (MinIO,
//! storage gateways, etc.) using HTTP range requests. The object size is
//! fetched once on creation via HEAD; after that every read is a single
//! ranged GetObject.

use std::error::Error as _;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::IoError;

use super::RangeReader;

/// Build an S3 client for the configured region and optional custom endpoint.
///
/// Credentials come from the default AWS provider chain (environment,
/// profile, instance role).
pub async fn create_object_client(region: &str, endpoint: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));

    if let Some(endpoint) = endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let config = loader.load().await;
    Client::new(&config)
}

/// Object-store-backed implementation of RangeReader.
#[derive(Clone)]
pub struct ObjectRangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl ObjectRangeReader {
    /// Create a reader for the given bucket and key.
    ///
    /// Performs a HEAD request to determine the object size. Returns
    /// `IoError::NotFound` if the object does not exist and
    /// `IoError::AccessDenied` if the store rejects our credentials.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &identifier))?;

        let size = head.content_length().unwrap_or(0) as u64;

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the object key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Map an SDK service error onto our I/O error kinds.
fn classify_sdk_error<E, R>(err: aws_sdk_s3::error::SdkError<E, R>, identifier: &str) -> IoError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let text = err.to_string();
    let source = err
        .source()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let combined = format!("{} {}", text, source);
    if combined.contains("NotFound") || combined.contains("NoSuchKey") || combined.contains("404") {
        return IoError::NotFound(identifier.to_string());
    }
    if combined.contains("AccessDenied") || combined.contains("403") {
        return IoError::AccessDenied(identifier.to_string());
    }
    IoError::Upstream(format!("{}: {}", identifier, text))
}

#[async_trait]
impl RangeReader for ObjectRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        // HTTP ranges are inclusive on both ends.
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &self.identifier))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::Upstream(format!(
                "{}: short range response, wanted {} bytes, got {}",
                self.identifier,
                len,
                data.len()
            )));
        }

        Ok(data)
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

#[cfg(test)]
mod tests {
    // ObjectRangeReader is exercised against live or emulated stores in
    // deployment smoke tests; unit coverage here is limited to what needs no
    // network.

    #[tokio::test]
    async fn test_create_object_client_with_endpoint() {
        // Builds a client without touching the network.
        let client = super::create_object_client("us-east-1", Some("http://127.0.0.1:9000")).await;
        let _ = client; // construction is the assertion
    }
}
