//! Filesystem-backed derivative cache.
//!
//! Encoded outputs are memoized under their request fingerprint: the payload
//! lives in a file named by the fingerprint hex and a JSON sidecar records
//! media type, originating identifier, size, and timestamps. Writes stage
//! into a temporary file and install atomically on finish; a staged write
//! dropped without finishing leaves nothing behind.
//!
//! The cache is a hint, never a source of truth — a stale or missing entry
//! only costs a rebuild, provided the fingerprint covers every
//! pixel-affecting input.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Error;
use crate::format::Format;
use crate::ops::Fingerprint;

/// Sidecar suffix next to each payload file.
const SIDECAR_SUFFIX: &str = ".json";

// =============================================================================
// Entry Metadata
// =============================================================================

/// Sidecar contents for one cached derivative.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    media_type: String,
    identifier: String,
    size: u64,
    created_epoch_secs: u64,
    last_access_epoch_secs: u64,
}

/// A cache hit: where the payload lives and what it is.
#[derive(Debug, Clone)]
pub struct CachedDerivative {
    pub format: Format,
    pub path: PathBuf,
    pub size: u64,
}

impl CachedDerivative {
    /// Read the whole payload.
    pub async fn read(&self) -> Result<Bytes, Error> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Internal(format!("cache payload read: {}", e)))?;
        Ok(Bytes::from(bytes))
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Staged Writes
// =============================================================================

/// An in-progress cache write.
///
/// Bytes accumulate in a temporary file; [`DerivativeCache::install`] renames
/// it into place and publishes the index entry. Dropping a staged write
/// deletes the temporary file.
pub struct StagedDerivative {
    staging: tempfile::NamedTempFile,
    fingerprint_hex: String,
    identifier: String,
    format: Format,
    written: u64,
}

impl StagedDerivative {
    /// Append payload bytes.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.staging
            .write_all(bytes)
            .map_err(|e| Error::Internal(format!("cache staging write: {}", e)))?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

// =============================================================================
// DerivativeCache
// =============================================================================

struct IndexState {
    entries: HashMap<String, EntryMeta>,
    total_size: u64,
}

/// Content-addressed store of encoded derivatives.
pub struct DerivativeCache {
    dir: PathBuf,
    soft_cap_bytes: u64,
    ttl: Option<Duration>,
    state: RwLock<IndexState>,
}

impl DerivativeCache {
    /// Open (or create) a cache directory and load its sidecar index.
    ///
    /// `ttl_seconds` of 0 disables time-based eviction; `soft_cap_bytes` of 0
    /// disables size-based eviction.
    pub async fn open(
        dir: impl Into<PathBuf>,
        soft_cap_bytes: u64,
        ttl_seconds: u64,
    ) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("cache dir: {}", e)))?;

        let mut entries = HashMap::new();
        let mut total_size = 0u64;

        let mut listing = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Internal(format!("cache dir scan: {}", e)))?;
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("cache dir scan: {}", e)))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            let Some(hex) = name.strip_suffix(SIDECAR_SUFFIX) else {
                continue;
            };
            match tokio::fs::read(item.path()).await {
                Ok(raw) => match serde_json::from_slice::<EntryMeta>(&raw) {
                    Ok(meta) => {
                        total_size += meta.size;
                        entries.insert(hex.to_string(), meta);
                    }
                    Err(e) => warn!(entry = %name, "discarding unreadable sidecar: {}", e),
                },
                Err(e) => warn!(entry = %name, "discarding unreadable sidecar: {}", e),
            }
        }

        debug!(
            dir = %dir.display(),
            entries = entries.len(),
            total_size,
            "opened derivative cache"
        );

        Ok(Self {
            dir,
            soft_cap_bytes,
            ttl: (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds)),
            state: RwLock::new(IndexState {
                entries,
                total_size,
            }),
        })
    }

    fn payload_path(&self, hex: &str) -> PathBuf {
        self.dir.join(hex)
    }

    fn sidecar_path(&self, hex: &str) -> PathBuf {
        self.dir.join(format!("{}{}", hex, SIDECAR_SUFFIX))
    }

    /// Look up a fingerprint.
    ///
    /// TTL-expired entries are removed on access and reported as misses.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CachedDerivative> {
        let hex = fingerprint.hex();
        let expired = {
            let mut state = self.state.write().await;
            let meta = state.entries.get_mut(hex)?;

            let expired = self
                .ttl
                .map(|ttl| now_epoch_secs().saturating_sub(meta.created_epoch_secs) > ttl.as_secs())
                .unwrap_or(false);
            if !expired {
                meta.last_access_epoch_secs = now_epoch_secs();
                let hit = CachedDerivative {
                    format: Format::from_media_type(&meta.media_type)?,
                    path: self.payload_path(hex),
                    size: meta.size,
                };
                return Some(hit);
            }
            expired
        };

        if expired {
            debug!(fingerprint = hex, "evicting expired derivative on access");
            self.remove_entry(hex).await;
        }
        None
    }

    /// Begin a staged write for a fingerprint.
    pub fn put(&self, fingerprint: &Fingerprint, format: Format) -> Result<StagedDerivative, Error> {
        let staging = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::Internal(format!("cache staging: {}", e)))?;
        Ok(StagedDerivative {
            staging,
            fingerprint_hex: fingerprint.hex().to_string(),
            identifier: fingerprint.identifier().to_string(),
            format,
            written: 0,
        })
    }

    /// Atomically install a finished staged write and publish its entry.
    pub async fn install(&self, mut staged: StagedDerivative) -> Result<CachedDerivative, Error> {
        staged
            .staging
            .flush()
            .map_err(|e| Error::Internal(format!("cache staging flush: {}", e)))?;

        let hex = staged.fingerprint_hex.clone();
        let payload_path = self.payload_path(&hex);

        let now = now_epoch_secs();
        let meta = EntryMeta {
            media_type: staged.format.media_type().to_string(),
            identifier: staged.identifier.clone(),
            size: staged.written,
            created_epoch_secs: now,
            last_access_epoch_secs: now,
        };
        let sidecar = serde_json::to_vec(&meta)
            .map_err(|e| Error::Internal(format!("cache sidecar encode: {}", e)))?;

        // Payload lands first (rename within the same directory), sidecar
        // second; the index is updated only under the lock once both exist.
        staged
            .staging
            .persist(&payload_path)
            .map_err(|e| Error::Internal(format!("cache install: {}", e)))?;
        tokio::fs::write(self.sidecar_path(&hex), &sidecar)
            .await
            .map_err(|e| Error::Internal(format!("cache sidecar write: {}", e)))?;

        {
            let mut state = self.state.write().await;
            if let Some(old) = state.entries.insert(hex.clone(), meta.clone()) {
                state.total_size = state.total_size.saturating_sub(old.size);
            }
            state.total_size += meta.size;
        }

        debug!(fingerprint = %hex, size = meta.size, "installed derivative");

        Ok(CachedDerivative {
            format: staged.format,
            path: payload_path,
            size: meta.size,
        })
    }

    async fn remove_entry(&self, hex: &str) {
        {
            let mut state = self.state.write().await;
            if let Some(meta) = state.entries.remove(hex) {
                state.total_size = state.total_size.saturating_sub(meta.size);
            }
        }
        // Payload I/O happens outside the lock.
        let _ = tokio::fs::remove_file(self.payload_path(hex)).await;
        let _ = tokio::fs::remove_file(self.sidecar_path(hex)).await;
    }

    /// Purge one fingerprint.
    pub async fn purge_fingerprint(&self, fingerprint: &Fingerprint) {
        self.remove_entry(fingerprint.hex()).await;
    }

    /// Purge every entry whose identifier starts with `prefix`.
    pub async fn purge_identifier_prefix(&self, prefix: &str) {
        let victims: Vec<String> = {
            let state = self.state.read().await;
            state
                .entries
                .iter()
                .filter(|(_, meta)| meta.identifier.starts_with(prefix))
                .map(|(hex, _)| hex.clone())
                .collect()
        };
        for hex in victims {
            self.remove_entry(&hex).await;
        }
    }

    /// Purge everything.
    pub async fn purge_all(&self) {
        let victims: Vec<String> = {
            let state = self.state.read().await;
            state.entries.keys().cloned().collect()
        };
        for hex in victims {
            self.remove_entry(&hex).await;
        }
    }

    /// Evict least-recently-accessed entries until under the soft cap.
    ///
    /// Cooperative: holds the index lock only to pick victims, never during
    /// payload deletion, so reads are never blocked on file I/O.
    pub async fn evict_over_cap(&self) {
        if self.soft_cap_bytes == 0 {
            return;
        }
        loop {
            let victim: Option<String> = {
                let state = self.state.read().await;
                if state.total_size <= self.soft_cap_bytes {
                    return;
                }
                state
                    .entries
                    .iter()
                    .min_by_key(|(_, meta)| meta.last_access_epoch_secs)
                    .map(|(hex, _)| hex.clone())
            };
            match victim {
                Some(hex) => {
                    debug!(fingerprint = %hex, "size eviction");
                    self.remove_entry(&hex).await;
                }
                None => return,
            }
        }
    }

    /// Remove every TTL-expired entry.
    pub async fn sweep_expired(&self) {
        let Some(ttl) = self.ttl else { return };
        let cutoff = now_epoch_secs().saturating_sub(ttl.as_secs());
        let victims: Vec<String> = {
            let state = self.state.read().await;
            state
                .entries
                .iter()
                .filter(|(_, meta)| meta.created_epoch_secs < cutoff)
                .map(|(hex, _)| hex.clone())
                .collect()
        };
        for hex in victims {
            self.remove_entry(&hex).await;
        }
    }

    /// Current entry count and total payload bytes.
    pub async fn stats(&self) -> (usize, u64) {
        let state = self.state.read().await;
        (state.entries.len(), state.total_size)
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ops::{Encode, Operation, OperationList};

    fn fingerprint(identifier: &str) -> Fingerprint {
        let ops =
            OperationList::new(vec![Operation::Encode(Encode::new(Format::Jpeg))]).unwrap();
        Fingerprint::compute(identifier, &ops, &Config::standalone())
    }

    async fn cache_in(dir: &Path) -> DerivativeCache {
        DerivativeCache::open(dir, 0, 0).await.unwrap()
    }

    async fn put_bytes(cache: &DerivativeCache, fp: &Fingerprint, bytes: &[u8]) {
        let mut staged = cache.put(fp, Format::Jpeg).unwrap();
        staged.write_all(bytes).unwrap();
        cache.install(staged).await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path()).await;
        let fp = fingerprint("a.tif");

        assert!(cache.get(&fp).await.is_none());

        put_bytes(&cache, &fp, b"derivative bytes").await;

        let hit = cache.get(&fp).await.unwrap();
        assert_eq!(hit.format, Format::Jpeg);
        assert_eq!(hit.size, 16);
        assert_eq!(&hit.read().await.unwrap()[..], b"derivative bytes");
    }

    #[tokio::test]
    async fn test_dropped_staging_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path()).await;
        let fp = fingerprint("a.tif");

        {
            let mut staged = cache.put(&fp, Format::Jpeg).unwrap();
            staged.write_all(b"partial").unwrap();
            // dropped without install
        }

        assert!(cache.get(&fp).await.is_none());
        // Only nothing or temp remnants cleaned by NamedTempFile drop.
        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = fingerprint("persist.tif");
        {
            let cache = cache_in(dir.path()).await;
            put_bytes(&cache, &fp, b"persisted").await;
        }

        let reopened = cache_in(dir.path()).await;
        let hit = reopened.get(&fp).await.unwrap();
        assert_eq!(&hit.read().await.unwrap()[..], b"persisted");
    }

    #[tokio::test]
    async fn test_purge_selectors() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        let fp_a = fingerprint("books/a.tif");
        let fp_b = fingerprint("books/b.tif");
        let fp_c = fingerprint("maps/c.tif");
        for fp in [&fp_a, &fp_b, &fp_c] {
            put_bytes(&cache, fp, b"x").await;
        }

        cache.purge_fingerprint(&fp_a).await;
        assert!(cache.get(&fp_a).await.is_none());
        assert!(cache.get(&fp_b).await.is_some());

        cache.purge_identifier_prefix("books/").await;
        assert!(cache.get(&fp_b).await.is_none());
        assert!(cache.get(&fp_c).await.is_some());

        cache.purge_all().await;
        let (count, size) = cache.stats().await;
        assert_eq!((count, size), (0, 0));
    }

    #[tokio::test]
    async fn test_size_eviction_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DerivativeCache::open(dir.path(), 100, 0).await.unwrap();

        let fps: Vec<Fingerprint> =
            (0..4).map(|i| fingerprint(&format!("img-{}.tif", i))).collect();
        for fp in &fps {
            put_bytes(&cache, fp, &[0u8; 40]).await;
        }

        cache.evict_over_cap().await;
        let (_, size) = cache.stats().await;
        assert!(size <= 100);
    }

    #[tokio::test]
    async fn test_ttl_expiry_on_access() {
        let dir = tempfile::tempdir().unwrap();
        // TTL of 1 second.
        let cache = DerivativeCache::open(dir.path(), 0, 1).await.unwrap();
        let fp = fingerprint("ttl.tif");
        put_bytes(&cache, &fp, b"short lived").await;

        // Fresh: hit.
        assert!(cache.get(&fp).await.is_some());

        // Backdate the entry past the TTL.
        {
            let mut state = cache.state.write().await;
            state
                .entries
                .get_mut(fp.hex())
                .unwrap()
                .created_epoch_secs -= 10;
        }
        assert!(cache.get(&fp).await.is_none());
        let (count, _) = cache.stats().await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_reinstall_replaces_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path()).await;
        let fp = fingerprint("again.tif");

        put_bytes(&cache, &fp, &[0u8; 100]).await;
        put_bytes(&cache, &fp, &[0u8; 30]).await;

        let (count, size) = cache.stats().await;
        assert_eq!(count, 1);
        assert_eq!(size, 30);
    }
}
