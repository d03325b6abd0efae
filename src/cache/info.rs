//! In-memory cache of source-image facts.
//!
//! Dimensions and level layout are needed on every request before a single
//! pixel is decoded; memoizing them per identifier lets repeat requests skip
//! opening the source entirely. Bounded LRU, invalidated only by explicit
//! purge.

use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;

use crate::image::ImageInfo;

/// Bounded LRU of [`ImageInfo`] keyed by identifier.
pub struct InfoCache {
    entries: RwLock<LruCache<String, Arc<ImageInfo>>>,
}

impl InfoCache {
    /// Create a cache holding at most `capacity` infos.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    /// Look up an identifier, marking it recently used.
    pub async fn get(&self, identifier: &str) -> Option<Arc<ImageInfo>> {
        let mut entries = self.entries.write().await;
        entries.get(identifier).cloned()
    }

    /// Store an info, evicting the least recently used past capacity.
    pub async fn put(&self, info: Arc<ImageInfo>) {
        let mut entries = self.entries.write().await;
        entries.put(info.identifier.clone(), info);
    }

    /// Drop one identifier.
    pub async fn purge(&self, identifier: &str) {
        let mut entries = self.entries.write().await;
        entries.pop(identifier);
    }

    /// Drop everything.
    pub async fn purge_all(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Number of cached infos.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    fn info(identifier: &str) -> Arc<ImageInfo> {
        Arc::new(ImageInfo::monolithic(
            identifier,
            Format::Jpeg,
            100,
            100,
            8,
            3,
            false,
        ))
    }

    #[tokio::test]
    async fn test_get_put() {
        let cache = InfoCache::new(10);
        assert!(cache.get("a.jpg").await.is_none());

        cache.put(info("a.jpg")).await;
        let cached = cache.get("a.jpg").await.unwrap();
        assert_eq!(cached.identifier, "a.jpg");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = InfoCache::new(2);
        cache.put(info("a")).await;
        cache.put(info("b")).await;

        // Touch "a" so "b" is the eviction victim.
        cache.get("a").await;
        cache.put(info("c")).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_purge() {
        let cache = InfoCache::new(10);
        cache.put(info("a")).await;
        cache.put(info("b")).await;

        cache.purge("a").await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());

        cache.purge_all().await;
        assert!(cache.is_empty().await);
    }
}
