//! Block-granular caching layer over any RangeReader.
//!
//! Container parsing (TIFF IFD chains, JP2 box walks) issues many small reads
//! at scattered offsets. Against a remote store each of those would be a
//! round trip; this layer quantizes reads into fixed-size blocks, caches the
//! blocks in an LRU, and collapses concurrent fetches of the same block into
//! one upstream request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::IoError;

use super::RangeReader;

/// Default block size: 256KB. Large enough to amortize per-request latency,
/// small enough not to waste bandwidth on header walks.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in blocks (25.6MB at the default block size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 100;

/// Block-cached wrapper around a RangeReader.
///
/// Wraps a boxed reader so the same type works over files, HTTP, object
/// stores, and memory buffers. Safe to share across tasks behind an `Arc`.
pub struct BlockCachedReader {
    inner: Arc<dyn RangeReader>,
    block_size: usize,
    blocks: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl BlockCachedReader {
    /// Wrap a reader with default block size and capacity.
    pub fn new(inner: Arc<dyn RangeReader>) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Wrap a reader with a custom block size and block capacity.
    pub fn with_capacity(inner: Arc<dyn RangeReader>, block_size: usize, capacity: usize) -> Self {
        Self {
            inner,
            block_size,
            blocks: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of blocks currently cached.
    pub async fn cached_blocks(&self) -> usize {
        self.blocks.read().await.len()
    }

    #[inline]
    fn block_index(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    /// Get a block, fetching it from the source if needed.
    ///
    /// Concurrent requests for the same uncached block share one fetch: the
    /// first requester becomes the leader, everyone else waits on its Notify
    /// and re-checks the cache.
    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            {
                let cache = self.blocks.read().await;
                if let Some(data) = cache.peek(&index) {
                    return Ok(data.clone());
                }
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(notify) = in_flight.get(&index) {
                    let notify = notify.clone();
                    drop(in_flight);
                    notify.notified().await;
                    continue;
                }
                let notify = Arc::new(Notify::new());
                in_flight.insert(index, notify.clone());
                notify
            };

            let result = self.fetch_block(index).await;

            {
                let mut cache = self.blocks.write().await;
                let mut in_flight = self.in_flight.lock().await;
                if let Ok(ref data) = result {
                    cache.put(index, data.clone());
                }
                in_flight.remove(&index);
            }
            notify.notify_waiters();

            return result;
        }
    }

    async fn fetch_block(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size as u64;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }
        let len = (self.block_size as u64).min(remaining) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl RangeReader for BlockCachedReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        if offset + len as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let first = self.block_index(offset);
        let last = self.block_index(offset + len as u64 - 1);

        if first == last {
            let block = self.block(first).await?;
            let start = (offset % self.block_size as u64) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut cursor = offset;
        let mut remaining = len;
        for index in first..=last {
            let block = self.block(index).await?;
            let start = (cursor % self.block_size as u64) as usize;
            let take = (block.len() - start).min(remaining);
            out.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
            remaining -= take;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Tests
// =============================================================================
