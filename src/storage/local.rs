//! Local filesystem storage backend.
//!
//! Each token owns a directory under the configured root; the uploaded
//! file and its metadata sibling are stored as plain files inside it:
//!
//!   Data:      `{root}/{token}/{filename}`
//!   Metadata:  `{root}/{token}/{filename}.metadata`
//!
//! Writes go to a temp file first, then fsync and rename.  Ranged reads
//! are not supported; a supplied range is ignored and the whole object
//! is served.  There is no native expiry, so retention is enforced by
//! `purge`, which removes files older than the window by modification
//! time.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::backend::{GetResult, ObjectBody, ObjectKind, StorageBackend};
use super::key::{self, ResolvedKey};
use super::range::RangeRequest;
use crate::errors::{Result, StorageError};

/// Stores uploads on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all token directories.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory (and the `.tmp` staging directory used for atomic
    /// writes) will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        info!("local storage backend initialized at {}", root.display());
        Ok(Self { root })
    }

    /// Reject path segments that would escape the root directory.
    fn check_segment(segment: &str) -> Result<()> {
        for component in Path::new(segment).components() {
            if matches!(component, Component::ParentDir | Component::RootDir) {
                return Err(StorageError::BackendUnavailable {
                    message: format!("path traversal detected in {segment:?}"),
                });
            }
        }
        Ok(())
    }

    /// Generate a temp file path under `.tmp/` for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }

    /// List the token's directory in sorted order and pick the entry
    /// matching `kind`.  A missing directory resolves to `None`.
    async fn resolve(&self, token: &str, kind: ObjectKind) -> Result<Option<ResolvedKey>> {
        Self::check_segment(token)?;

        let dir = self.root.join(token);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::unavailable("read_dir", e)),
        };

        let mut keys: Vec<String> = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    keys.push(key::object_key(token, &name));
                }
                Ok(None) => break,
                Err(e) => return Err(StorageError::unavailable("read_dir", e)),
            }
        }
        keys.sort();

        Ok(key::select_key(keys.iter().map(|k| k.as_str()), kind))
    }

    /// Absolute path of a resolved key.
    fn path_of(&self, resolved: &ResolvedKey) -> PathBuf {
        self.root.join(&resolved.key)
    }
}

impl StorageBackend for LocalBackend {
    fn type_name(&self) -> &'static str {
        "local"
    }

    fn is_range_supported(&self) -> bool {
        false
    }

    fn head(
        &self,
        token: &str,
        kind: ObjectKind,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let Some(resolved) = self.resolve(&token, kind).await? else {
                return Ok(0);
            };
            let meta = tokio::fs::metadata(self.path_of(&resolved))
                .await
                .map_err(|e| StorageError::unavailable("metadata", e))?;
            Ok(meta.len())
        })
    }

    fn get(
        &self,
        token: &str,
        kind: ObjectKind,
        _range: Option<RangeRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<GetResult>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let Some(resolved) = self.resolve(&token, kind).await? else {
                return Err(StorageError::NotFound { token });
            };

            let path = self.path_of(&resolved);
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound { token });
                }
                Err(e) => return Err(StorageError::unavailable("open", e)),
            };
            let content_length = file
                .metadata()
                .await
                .map_err(|e| StorageError::unavailable("metadata", e))?
                .len();

            // Ranged reads are not supported here; the caller sees the
            // whole object and no resolved range.
            Ok(GetResult {
                body: Box::pin(file),
                filename: resolved.filename,
                content_length,
                range: None,
            })
        })
    }

    fn put(
        &self,
        token: &str,
        filename: &str,
        mut body: ObjectBody,
        _content_type: &str,
        _content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let token = token.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            Self::check_segment(&token)?;
            Self::check_segment(&filename)?;

            let dir = self.root.join(&token);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::unavailable("create_dir_all", e))?;

            let final_path = dir.join(&filename);
            let tmp_path = self.temp_path();

            debug!("writing {} via {}", final_path.display(), tmp_path.display());

            // Temp-fsync-rename so a failed write never leaves a
            // half-written object under the token.
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::unavailable("create", e))?;
            let copied = tokio::io::copy(&mut body, &mut file).await;
            if let Err(e) = copied {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(StorageError::unavailable("write", e));
            }
            file.sync_all()
                .await
                .map_err(|e| StorageError::unavailable("fsync", e))?;
            drop(file);

            tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map_err(|e| StorageError::unavailable("rename", e))?;

            Ok(())
        })
    }

    fn delete(&self, token: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let mut metadata_removed = false;
            if let Some(resolved) = self.resolve(&token, ObjectKind::Metadata).await? {
                tokio::fs::remove_file(self.path_of(&resolved))
                    .await
                    .map_err(|e| StorageError::unavailable("remove_file (metadata)", e))?;
                metadata_removed = true;
            }

            match self.resolve(&token, ObjectKind::Data).await {
                Ok(Some(resolved)) => {
                    if let Err(e) = tokio::fs::remove_file(self.path_of(&resolved)).await {
                        let err = StorageError::unavailable("remove_file (data)", e);
                        if metadata_removed {
                            return Err(StorageError::PartialDelete {
                                token,
                                message: err.to_string(),
                            });
                        }
                        return Err(err);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if metadata_removed {
                        return Err(StorageError::PartialDelete {
                            token,
                            message: e.to_string(),
                        });
                    }
                    return Err(e);
                }
            }

            // The token directory is empty now; removing it is
            // best-effort.
            let _ = tokio::fs::remove_dir(self.root.join(&token)).await;

            Ok(())
        })
    }

    fn purge(
        &self,
        older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
                return Ok(());
            };

            let mut removed: usize = 0;
            let mut failed: usize = 0;

            let mut tokens = tokio::fs::read_dir(&self.root)
                .await
                .map_err(|e| StorageError::unavailable("read_dir", e))?;
            loop {
                let token_dir = match tokens.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("purge: listing {} failed: {}", self.root.display(), e);
                        failed += 1;
                        break;
                    }
                };
                if token_dir.file_name() == ".tmp" {
                    continue;
                }
                let dir = token_dir.path();
                let mut files = match tokio::fs::read_dir(&dir).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!("purge: listing {} failed: {}", dir.display(), e);
                        failed += 1;
                        continue;
                    }
                };
                loop {
                    let entry = match files.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("purge: listing {} failed: {}", dir.display(), e);
                            failed += 1;
                            break;
                        }
                    };
                    let path = entry.path();
                    let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                        Ok(modified) => modified,
                        Err(e) => {
                            warn!("purge: cannot stat {}: {}", path.display(), e);
                            failed += 1;
                            continue;
                        }
                    };
                    if modified > cutoff {
                        continue;
                    }
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            // Keep scanning; the failure is reported
                            // after the pass completes.
                            warn!("purge: cannot remove {}: {}", path.display(), e);
                            failed += 1;
                        }
                    }
                }
                let _ = tokio::fs::remove_dir(&dir).await;
            }

            debug!("purge: removed {} expired objects", removed);

            if failed > 0 {
                return Err(StorageError::BackendUnavailable {
                    message: format!("purge: {failed} objects could not be removed"),
                });
            }
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new(dir.path()).expect("failed to create backend");
        (dir, backend)
    }

    fn body_of(bytes: &[u8]) -> ObjectBody {
        Box::pin(std::io::Cursor::new(bytes.to_vec()))
    }

    async fn read_all(mut body: ObjectBody) -> Vec<u8> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let (_dir, backend) = test_backend();

        backend
            .put("tok1", "hello.txt", body_of(b"hello world"), "text/plain", 11)
            .await
            .unwrap();

        let result = backend.get("tok1", ObjectKind::Data, None).await.unwrap();
        assert_eq!(result.filename, "hello.txt");
        assert_eq!(result.content_length, 11);
        assert!(result.range.is_none());
        assert_eq!(read_all(result.body).await, b"hello world");
    }

    #[tokio::test]
    async fn head_reports_zero_for_missing_token() {
        let (_dir, backend) = test_backend();
        assert_eq!(backend.head("nope", ObjectKind::Data).await.unwrap(), 0);
        assert_eq!(backend.head("nope", ObjectKind::Metadata).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn head_reports_content_length() {
        let (_dir, backend) = test_backend();
        backend
            .put("tok1", "a.bin", body_of(&[0u8; 42]), "application/octet-stream", 42)
            .await
            .unwrap();
        assert_eq!(backend.head("tok1", ObjectKind::Data).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn get_missing_token_is_not_exist() {
        let (_dir, backend) = test_backend();
        let err = backend
            .get("nope", ObjectKind::Data, None)
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn metadata_sibling_resolves_separately() {
        let (_dir, backend) = test_backend();
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();
        backend
            .put("tok1", "file.txt.metadata", body_of(b"{}"), "application/json", 2)
            .await
            .unwrap();

        let data = backend.get("tok1", ObjectKind::Data, None).await.unwrap();
        assert_eq!(data.filename, "file.txt");
        assert_eq!(read_all(data.body).await, b"payload");

        let meta = backend
            .get("tok1", ObjectKind::Metadata, None)
            .await
            .unwrap();
        assert_eq!(read_all(meta.body).await, b"{}");
    }

    #[tokio::test]
    async fn delete_removes_both_objects_and_is_idempotent() {
        let (_dir, backend) = test_backend();
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();
        backend
            .put("tok1", "file.txt.metadata", body_of(b"{}"), "application/json", 2)
            .await
            .unwrap();

        backend.delete("tok1").await.unwrap();
        assert_eq!(backend.head("tok1", ObjectKind::Data).await.unwrap(), 0);
        assert_eq!(backend.head("tok1", ObjectKind::Metadata).await.unwrap(), 0);

        // Already gone: a second delete is a no-op, not an error.
        backend.delete("tok1").await.unwrap();
    }

    #[tokio::test]
    async fn put_replaces_existing_object() {
        let (_dir, backend) = test_backend();
        backend
            .put("tok1", "file.txt", body_of(b"version 1"), "text/plain", 9)
            .await
            .unwrap();
        backend
            .put("tok1", "file.txt", body_of(b"v2"), "text/plain", 2)
            .await
            .unwrap();

        let result = backend.get("tok1", ObjectKind::Data, None).await.unwrap();
        assert_eq!(read_all(result.body).await, b"v2");
    }

    #[tokio::test]
    async fn purge_removes_old_objects_and_keeps_fresh_ones() {
        let (_dir, backend) = test_backend();
        backend
            .put("old", "stale.txt", body_of(b"stale"), "text/plain", 5)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        backend
            .put("new", "fresh.txt", body_of(b"fresh"), "text/plain", 5)
            .await
            .unwrap();

        backend.purge(Duration::from_millis(150)).await.unwrap();

        assert_eq!(backend.head("old", ObjectKind::Data).await.unwrap(), 0);
        assert_eq!(backend.head("new", ObjectKind::Data).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn ranges_are_unsupported_and_ignored() {
        let (_dir, backend) = test_backend();
        assert!(!backend.is_range_supported());

        backend
            .put("tok1", "file.txt", body_of(b"0123456789"), "text/plain", 10)
            .await
            .unwrap();

        // The whole object comes back; the caller detects the ignored
        // range by comparing lengths.
        let result = backend
            .get("tok1", ObjectKind::Data, Some(RangeRequest::bounded(2, 5)))
            .await
            .unwrap();
        assert_eq!(result.content_length, 10);
        assert!(result.range.is_none());
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_token() {
        let (_dir, backend) = test_backend();
        let err = backend
            .put("../escape", "file.txt", body_of(b"x"), "text/plain", 1)
            .await
            .unwrap_err();
        assert!(!err.is_not_exist());
    }
}
