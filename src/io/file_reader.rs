//! Local-file implementation of RangeReader.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::IoError;

use super::RangeReader;

/// RangeReader over a local file.
///
/// The file is opened once and positioned reads are serialized through a
/// mutex; the size is captured at open so bounds checks never touch the
/// filesystem again.
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for positioned reads.
    ///
    /// Returns `IoError::NotFound` if the path does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(IoError::from)?;
        let size = file.metadata().await.map_err(IoError::from)?.len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier: format!("file://{}", path.display()),
        })
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(IoError::from)?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(IoError::from)?;
        Ok(Bytes::from(buf))
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
