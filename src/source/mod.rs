//! Source providers: where identifiers become bytes.
//!
//! A provider answers two questions about an identifier — what is it
//! (`probe`) and how do I read it (`open`). Opening yields a
//! [`SourceHandle`]: a seekable local file when the store is a filesystem,
//! otherwise a positioned-read stream capability. Every provider supports
//! the stream form; the file form is an optimization some stores offer.
//!
//! The probe policy is uniform: a recognized identifier extension wins,
//! otherwise the first bytes are matched against magic signatures, and HTTP
//! sources finally fall back to the origin's Content-Type.

mod database;
mod filesystem;
mod http;
mod object_store;

pub use database::{BlobQueries, BlobQueryExecutor, DatabaseSource};
pub use filesystem::FilesystemSource;
pub use http::HttpSource;
pub use object_store::ObjectStoreSource;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::format::Format;
use crate::io::{FileRangeReader, RangeReader};

// =============================================================================
// Lookup Strategy
// =============================================================================

/// How an identifier maps to a store location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Affix mapping: prefix ⊕ identifier ⊕ suffix.
    Basic,

    /// Ask the delegate's per-provider hook.
    Script,
}

impl LookupStrategy {
    /// Parse the configured strategy name.
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "basic" => Ok(LookupStrategy::Basic),
            "script" => Ok(LookupStrategy::Script),
            other => Err(Error::InvalidRequest(format!(
                "unknown lookup strategy '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// SourceHandle
// =============================================================================

/// The capability a provider yields for reading one source image.
pub enum SourceHandle {
    /// A local, seekable file.
    File(PathBuf),

    /// A positioned-read stream; every call is an independent fresh read.
    Stream(Arc<dyn RangeReader>),
}

impl SourceHandle {
    /// The local path, when this handle is a file.
    pub fn file_path(&self) -> Option<&std::path::Path> {
        match self {
            SourceHandle::File(path) => Some(path.as_path()),
            SourceHandle::Stream(_) => None,
        }
    }

    /// Convert into a positioned reader, opening the file form as needed.
    pub async fn into_range_reader(self) -> Result<Arc<dyn RangeReader>, Error> {
        match self {
            SourceHandle::File(path) => {
                let reader = FileRangeReader::open(&path).await.map_err(Error::from)?;
                Ok(Arc::new(reader))
            }
            SourceHandle::Stream(reader) => Ok(reader),
        }
    }
}

// =============================================================================
// Source
// =============================================================================

/// A backing store that resolves identifiers to readable sources.
#[async_trait]
pub trait Source: Send + Sync {
    /// The provider's registry name.
    fn name(&self) -> &'static str;

    /// Cheap media-type inference for an identifier.
    ///
    /// Errors distinguish `NotFound`, `AccessDenied`, and
    /// `UpstreamUnavailable`; an unrecognizable type is
    /// `UnsupportedSourceFormat`.
    async fn probe(&self, identifier: &str) -> Result<Format, Error>;

    /// Open the identifier for reading.
    async fn open(&self, identifier: &str) -> Result<SourceHandle, Error>;
}

/// Shared probe tail: sniff leading bytes once the extension fails.
pub(crate) async fn sniff_via(
    reader: &dyn RangeReader,
    identifier: &str,
) -> Result<Format, Error> {
    crate::format::sniff_format(reader).await.map_err(|_| {
        Error::UnsupportedSourceFormat(format!("{}: unrecognized source bytes", identifier))
    })
}

// =============================================================================
// Tests
// =============================================================================
