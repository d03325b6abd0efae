use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for random-access reads over a source image's bytes.
///
/// This is the stream capability every source provider must supply: each call
/// is an independent positioned read, so a single instance behaves like a
/// factory of fresh streams. Structure-aware readers (TIFF, JPEG2000) use it
/// to fetch only the tiles and header structures they need; implementations
/// must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    fn identifier(&self) -> &str;
}

/// Fetch the entire resource in one read.
///
/// Whole-file codecs (JPEG, PNG, JPEG2000) need all the bytes anyway; this
/// keeps that path to a single upstream request.
pub async fn read_all(reader: &dyn RangeReader) -> Result<Bytes, IoError> {
    let size = reader.size();
    if size == 0 {
        return Ok(Bytes::new());
    }
    reader.read_exact_at(0, size as usize).await
}

// =============================================================================
// In-Memory Reader
// =============================================================================

/// RangeReader over an in-memory byte buffer.
///
/// Used for BLOB sources (the database provider fetches the whole BLOB) and
/// throughout the test suites.
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    /// Create a reader over the given bytes.
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size: self.data.len() as u64,
        })?;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// TIFF files can be either little-endian or big-endian, determined by the
// magic bytes at the start of the file; JPEG and JPEG2000 markers are always
// big-endian. These helpers are used by all the container parsers.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_reader_in_bounds() {
        let reader = MemoryRangeReader::new(vec![1u8, 2, 3, 4, 5], "mem://test");
        let bytes = reader.read_exact_at(1, 3).await.unwrap();
        assert_eq!(&bytes[..], &[2, 3, 4]);
        assert_eq!(reader.size(), 5);
        assert_eq!(reader.identifier(), "mem://test");
    }

    #[tokio::test]
    async fn test_memory_reader_out_of_bounds() {
        let reader = MemoryRangeReader::new(vec![0u8; 10], "mem://test");
        let result = reader.read_exact_at(8, 3).await;
        assert!(matches!(result, Err(IoError::RangeOutOfBounds { .. })));
    }

    #[tokio::test]
    async fn test_read_all() {
        let reader = MemoryRangeReader::new(vec![7u8; 32], "mem://test");
        let all = read_all(&reader).await.unwrap();
        assert_eq!(all.len(), 32);

        let empty = MemoryRangeReader::new(Vec::new(), "mem://empty");
        assert!(read_all(&empty).await.unwrap().is_empty());
    }

    #[test]
    fn test_read_u16() {
        assert_eq!(read_u16_le(&[0x02, 0x01]), 0x0102);
        assert_eq!(read_u16_be(&[0x01, 0x02]), 0x0102);
    }

    #[test]
    fn test_read_u32() {
        assert_eq!(read_u32_le(&[0x04, 0x03, 0x02, 0x01]), 0x01020304);
        assert_eq!(read_u32_be(&[0x01, 0x02, 0x03, 0x04]), 0x01020304);
    }

    #[test]
    fn test_read_u64() {
        assert_eq!(
            read_u64_le(&[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]),
            0x0102030405060708
        );
        assert_eq!(
            read_u64_be(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
            0x0102030405060708
        );
    }
}
