//! Relational BLOB source provider.
//!
//! Images stored as BLOBs are reached through three operator-supplied
//! parameterized queries: identifier translation, media-type lookup, and the
//! BLOB fetch itself. The actual database driver is injected behind
//! [`BlobQueryExecutor`]; the provider only ever hands it SQL text plus
//! positional bind values, so no identifier ever reaches the database as
//! concatenated SQL.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;
use crate::format::{detect_format, Format};
use crate::io::MemoryRangeReader;

use super::{Source, SourceHandle};

/// The three operator-supplied queries.
///
/// Each takes exactly one positional parameter. `identifier_sql` translates
/// the request identifier into the database's key (and may be a pass-through
/// `SELECT ?`); the other two take that key.
#[derive(Debug, Clone)]
pub struct BlobQueries {
    pub identifier_sql: String,
    pub media_type_sql: String,
    pub blob_sql: String,
}

/// The injected database driver surface.
///
/// Implementations must bind `params` positionally — never interpolate.
#[async_trait]
pub trait BlobQueryExecutor: Send + Sync {
    /// Run a query returning a single optional string.
    async fn query_string(&self, sql: &str, params: &[&str]) -> Result<Option<String>, Error>;

    /// Run a query returning a single optional BLOB.
    async fn query_blob(&self, sql: &str, params: &[&str]) -> Result<Option<Bytes>, Error>;
}

/// Database-backed implementation of [`Source`].
pub struct DatabaseSource {
    executor: Arc<dyn BlobQueryExecutor>,
    queries: BlobQueries,
}

impl DatabaseSource {
    /// Create a provider over an injected driver and query set.
    pub fn new(executor: Arc<dyn BlobQueryExecutor>, queries: BlobQueries) -> Self {
        Self { executor, queries }
    }

    /// Translate the request identifier into the database key.
    async fn database_key(&self, identifier: &str) -> Result<String, Error> {
        self.executor
            .query_string(&self.queries.identifier_sql, &[identifier])
            .await?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::NotFound(identifier.to_string()))
    }

    async fn fetch_blob(&self, identifier: &str) -> Result<Bytes, Error> {
        let key = self.database_key(identifier).await?;
        self.executor
            .query_blob(&self.queries.blob_sql, &[&key])
            .await?
            .ok_or_else(|| Error::NotFound(identifier.to_string()))
    }
}

#[async_trait]
impl Source for DatabaseSource {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn probe(&self, identifier: &str) -> Result<Format, Error> {
        if let Some(format) = Format::from_identifier(identifier) {
            return Ok(format);
        }

        // Stored media type, when the operator's schema records one.
        let key = self.database_key(identifier).await?;
        if let Some(media_type) = self
            .executor
            .query_string(&self.queries.media_type_sql, &[&key])
            .await?
        {
            if let Some(format) = Format::from_media_type(&media_type) {
                return Ok(format);
            }
        }

        // Fall back to sniffing the BLOB's leading bytes.
        let blob = self.fetch_blob(identifier).await?;
        detect_format(&blob).ok_or_else(|| {
            Error::UnsupportedSourceFormat(format!("{}: unrecognized BLOB bytes", identifier))
        })
    }

    async fn open(&self, identifier: &str) -> Result<SourceHandle, Error> {
        let blob = self.fetch_blob(identifier).await?;
        let reader = MemoryRangeReader::new(blob, format!("db://{}", identifier));
        Ok(SourceHandle::Stream(Arc::new(reader)))
    }
}

// =============================================================================
// Tests
// =============================================================================
