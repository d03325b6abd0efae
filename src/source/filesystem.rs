//! Local-filesystem source provider.
//!
//! Paths are formed as prefix ⊕ sanitized(identifier) ⊕ suffix. Sanitization
//! strips every `..` segment before the join, and opened paths are
//! canonicalized and checked for containment under the prefix root, so
//! neither dot-dot traversal nor symlink escapes can reach outside it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::delegate::{hooks, resolve_required, Delegate};
use crate::error::Error;
use crate::format::Format;
use crate::io::FileRangeReader;

use super::{sniff_via, LookupStrategy, Source, SourceHandle};

/// Filesystem-backed implementation of [`Source`].
pub struct FilesystemSource {
    prefix: PathBuf,
    suffix: String,
    lookup: LookupStrategy,
    delegate: Option<Arc<dyn Delegate>>,
}

impl FilesystemSource {
    /// Create a provider rooted at `prefix`.
    pub fn new(prefix: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            lookup: LookupStrategy::Basic,
            delegate: None,
        }
    }

    /// Resolve paths through the delegate's `get_pathname` hook instead of
    /// affix mapping.
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.lookup = LookupStrategy::Script;
        self.delegate = Some(delegate);
        self
    }

    /// Strip traversal fragments from an identifier before joining.
    ///
    /// Removes `..` segments (in any separator combination) and leading
    /// separators; empty and `.` segments collapse away with them.
    fn sanitize(identifier: &str) -> PathBuf {
        let mut clean = PathBuf::new();
        for segment in identifier.split(['/', '\\']) {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            clean.push(segment);
        }
        clean
    }

    /// Map an identifier to its candidate path.
    async fn resolve_path(&self, identifier: &str) -> Result<PathBuf, Error> {
        match self.lookup {
            LookupStrategy::Script => {
                let delegate = self
                    .delegate
                    .as_ref()
                    .ok_or_else(|| Error::Internal("script lookup without a delegate".into()))?;
                let path =
                    resolve_required(delegate.as_ref(), hooks::GET_PATHNAME, identifier).await?;
                Ok(PathBuf::from(path))
            }
            LookupStrategy::Basic => {
                let mut path = self.prefix.join(Self::sanitize(identifier));
                if !self.suffix.is_empty() {
                    let mut name = path.file_name().unwrap_or_default().to_os_string();
                    name.push(&self.suffix);
                    path.set_file_name(name);
                }
                Ok(path)
            }
        }
    }

    /// Canonicalize and verify containment under the prefix root.
    ///
    /// Symlinks resolve during canonicalization, so a link pointing outside
    /// the root fails containment even though its path appears inside.
    async fn checked_path(&self, identifier: &str) -> Result<PathBuf, Error> {
        let candidate = self.resolve_path(identifier).await?;

        let canonical = tokio::fs::canonicalize(&candidate).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(identifier.to_string())
            } else {
                Error::UpstreamUnavailable(e.to_string())
            }
        })?;

        // Delegate-resolved paths are the delegate's responsibility.
        if self.lookup == LookupStrategy::Basic && !self.prefix.as_os_str().is_empty() {
            let root = tokio::fs::canonicalize(&self.prefix)
                .await
                .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
            if !canonical.starts_with(&root) {
                debug!(?canonical, ?root, "path escaped the source root");
                return Err(Error::NotFound(identifier.to_string()));
            }
        }

        Ok(canonical)
    }
}

#[async_trait]
impl Source for FilesystemSource {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn probe(&self, identifier: &str) -> Result<Format, Error> {
        if let Some(format) = Format::from_identifier(identifier) {
            return Ok(format);
        }

        let path = self.checked_path(identifier).await?;
        let reader = FileRangeReader::open(&path).await.map_err(Error::from)?;
        sniff_via(&reader, identifier).await
    }

    async fn open(&self, identifier: &str) -> Result<SourceHandle, Error> {
        let path = self.checked_path(identifier).await?;
        Ok(SourceHandle::File(path))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(bytes).unwrap();
    }

    fn jpeg_magic() -> Vec<u8> {
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(
            FilesystemSource::sanitize("a/b/c.tif"),
            PathBuf::from("a/b/c.tif")
        );
        assert_eq!(
            FilesystemSource::sanitize("../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(
            FilesystemSource::sanitize("a/../../b.tif"),
            PathBuf::from("a/b.tif")
        );
        assert_eq!(
            FilesystemSource::sanitize("/absolute/path.tif"),
            PathBuf::from("absolute/path.tif")
        );
        assert_eq!(
            FilesystemSource::sanitize("..\\windows\\style"),
            PathBuf::from("windows/style")
        );
    }

    #[tokio::test]
    async fn test_open_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "photo.jpg", &jpeg_magic());

        let source = FilesystemSource::new(dir.path(), "");
        let handle = source.open("photo.jpg").await.unwrap();
        assert!(handle.file_path().is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemSource::new(dir.path(), "");
        assert!(matches!(
            source.open("nope.jpg").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_cannot_escape() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        write_file(outer.path(), "secret.jpg", &jpeg_magic());

        let source = FilesystemSource::new(&root, "");
        // With ".." stripped this resolves inside the root, where the file
        // does not exist.
        assert!(matches!(
            source.open("../secret.jpg").await,
            Err(Error::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        write_file(outer.path(), "target.jpg", &jpeg_magic());
        std::os::unix::fs::symlink(outer.path().join("target.jpg"), root.join("link.jpg"))
            .unwrap();

        let source = FilesystemSource::new(&root, "");
        assert!(matches!(
            source.open("link.jpg").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_suffix_appended() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "scan.tif", b"II\x2a\x00rest");

        let source = FilesystemSource::new(dir.path(), ".tif");
        assert!(source.open("scan").await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_prefers_extension() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemSource::new(dir.path(), "");
        // No file on disk needed: the extension answers first.
        assert_eq!(source.probe("anything.png").await.unwrap(), Format::Png);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_magic() {
        let dir = tempfile::tempdir().unwrap();
        // Mismatched content behind an unknown extension.
        write_file(dir.path(), "mystery.bin", &jpeg_magic());

        let source = FilesystemSource::new(dir.path(), "");
        assert_eq!(source.probe("mystery.bin").await.unwrap(), Format::Jpeg);
    }

    #[tokio::test]
    async fn test_delegate_lookup() {
        use crate::delegate::Delegate;

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "mapped.jpg", &jpeg_magic());

        struct PathDelegate(PathBuf);

        #[async_trait]
        impl Delegate for PathDelegate {
            async fn call(&self, hook: &str, id: &str) -> Result<Option<String>, Error> {
                assert_eq!(hook, hooks::GET_PATHNAME);
                if id == "alias" {
                    Ok(Some(self.0.join("mapped.jpg").display().to_string()))
                } else {
                    Ok(None)
                }
            }
        }

        let source = FilesystemSource::new("", "")
            .with_delegate(Arc::new(PathDelegate(dir.path().to_path_buf())));

        assert!(source.open("alias").await.is_ok());
        assert!(matches!(
            source.open("unknown").await,
            Err(Error::NotFound(_))
        ));
    }
}
