//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! backend key.  A configurable memory limit (`max_size_bytes`) caps
//! total stored bytes.  Each entry records its creation time and, when
//! a retention policy is configured, an absolute expiry; `purge` drops
//! expired entries.
//!
//! Mostly useful for tests and single-process deployments; nothing
//! survives a restart.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::backend::{GetResult, ObjectBody, ObjectKind, StorageBackend};
use super::key::{self, ResolvedKey};
use super::range::RangeRequest;
use crate::errors::{Result, StorageError};

/// One stored object.
#[derive(Debug, Clone)]
struct StoredEntry {
    data: Bytes,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Stores uploads in process memory.
pub struct MemoryBackend {
    /// Object store: backend key -> entry.
    objects: tokio::sync::RwLock<HashMap<String, StoredEntry>>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
    /// Retention window attached as an expiry to every write, if any.
    purge_ttl: Option<Duration>,
}

impl MemoryBackend {
    /// Create a new `MemoryBackend`.
    pub fn new(max_size_bytes: u64, purge_ttl: Option<Duration>) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(HashMap::new()),
            max_size_bytes,
            purge_ttl,
        }
    }

    /// Pick the key matching `kind` from the token's prefix, scanning
    /// keys in sorted order so the listing order is stable.
    async fn resolve(&self, token: &str, kind: ObjectKind) -> Option<ResolvedKey> {
        let prefix = key::token_prefix(token);
        let objects = self.objects.read().await;
        let mut keys: Vec<&str> = objects
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k.as_str())
            .collect();
        keys.sort_unstable();
        key::select_key(keys, kind)
    }

    #[cfg(test)]
    async fn entry(&self, object_key: &str) -> Option<StoredEntry> {
        self.objects.read().await.get(object_key).cloned()
    }
}

impl StorageBackend for MemoryBackend {
    fn type_name(&self) -> &'static str {
        "memory"
    }

    fn is_range_supported(&self) -> bool {
        true
    }

    fn head(
        &self,
        token: &str,
        kind: ObjectKind,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let Some(resolved) = self.resolve(&token, kind).await else {
                return Ok(0);
            };
            let objects = self.objects.read().await;
            Ok(objects
                .get(&resolved.key)
                .map(|e| e.data.len() as u64)
                .unwrap_or(0))
        })
    }

    fn get(
        &self,
        token: &str,
        kind: ObjectKind,
        range: Option<RangeRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<GetResult>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let Some(resolved) = self.resolve(&token, kind).await else {
                return Err(StorageError::NotFound { token });
            };

            let data = {
                let objects = self.objects.read().await;
                match objects.get(&resolved.key) {
                    Some(entry) => entry.data.clone(),
                    None => return Err(StorageError::NotFound { token }),
                }
            };
            let total = data.len() as u64;

            let (served, range_result) = match range {
                Some(request) => {
                    let resolved_range = request.resolve(total)?;
                    let slice =
                        data.slice(resolved_range.start as usize..=resolved_range.end as usize);
                    (slice, Some(resolved_range))
                }
                None => (data, None),
            };

            let content_length = served.len() as u64;
            Ok(GetResult {
                body: Box::pin(std::io::Cursor::new(served)),
                filename: resolved.filename,
                content_length,
                range: range_result,
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
        let object_key = key::object_key(token, filename);
        Box::pin(async move {
            let mut data = Vec::new();
            body.read_to_end(&mut data)
                .await
                .map_err(|e| StorageError::unavailable("read upload body", e))?;
            let data = Bytes::from(data);

            let now = Utc::now();
            let expires_at = self
                .purge_ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| now + ttl);

            debug!("storing {} ({} bytes) in memory", object_key, data.len());

            let mut objects = self.objects.write().await;

            if self.max_size_bytes > 0 {
                // A replaced object frees its bytes, so it does not
                // count against the limit.
                let current: u64 = objects
                    .iter()
                    .filter(|(k, _)| **k != object_key)
                    .map(|(_, e)| e.data.len() as u64)
                    .sum();
                if current + data.len() as u64 > self.max_size_bytes {
                    return Err(StorageError::BackendUnavailable {
                        message: format!(
                            "memory limit exceeded: current={current}, additional={}, max={}",
                            data.len(),
                            self.max_size_bytes
                        ),
                    });
                }
            }

            objects.insert(
                object_key,
                StoredEntry {
                    data,
                    created_at: now,
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn delete(&self, token: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            // Both objects go under one write lock, so a delete is
            // never observed half-done.
            let prefix = key::token_prefix(&token);
            let mut objects = self.objects.write().await;

            let mut keys: Vec<String> = objects
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            keys.sort_unstable();

            let metadata = key::select_key(keys.iter().map(|k| k.as_str()), ObjectKind::Metadata);
            let data = key::select_key(keys.iter().map(|k| k.as_str()), ObjectKind::Data);

            if let Some(resolved) = metadata {
                objects.remove(&resolved.key);
            }
            if let Some(resolved) = data {
                objects.remove(&resolved.key);
            }
            Ok(())
        })
    }

    fn purge(
        &self,
        older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = Utc::now();
            let retention = chrono::Duration::from_std(older_than).ok();

            let mut objects = self.objects.write().await;
            let before = objects.len();
            objects.retain(|_, entry| match entry.expires_at {
                Some(expires_at) => expires_at > now,
                // Entries written before a policy was configured fall
                // back to the caller's retention window.
                None => match retention {
                    Some(retention) if retention > chrono::Duration::zero() => {
                        entry.created_at + retention > now
                    }
                    _ => true,
                },
            });

            debug!("purge: removed {} expired objects", before - objects.len());
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::range::RangeResult;
    use std::sync::Arc;

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
        let backend = MemoryBackend::new(0, None);
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
    async fn missing_token_heads_zero_and_get_is_not_exist() {
        let backend = MemoryBackend::new(0, None);
        assert_eq!(backend.head("nope", ObjectKind::Data).await.unwrap(), 0);

        let err = backend
            .get("nope", ObjectKind::Data, None)
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn range_read_returns_resolved_interval() {
        let backend = MemoryBackend::new(0, None);
        let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        backend
            .put("tok1", "data.bin", body_of(&payload), "application/octet-stream", 1000)
            .await
            .unwrap();

        let result = backend
            .get("tok1", ObjectKind::Data, Some(RangeRequest::bounded(100, 199)))
            .await
            .unwrap();
        assert_eq!(result.content_length, 100);
        assert_eq!(
            result.range,
            Some(RangeResult {
                start: 100,
                end: 199,
                total: 1000
            })
        );
        assert_eq!(read_all(result.body).await, payload[100..=199].to_vec());
    }

    #[tokio::test]
    async fn open_ended_range_runs_to_last_byte() {
        let backend = MemoryBackend::new(0, None);
        backend
            .put("tok1", "data.bin", body_of(&[9u8; 1000]), "application/octet-stream", 1000)
            .await
            .unwrap();

        let result = backend
            .get("tok1", ObjectKind::Data, Some(RangeRequest::from_offset(900)))
            .await
            .unwrap();
        assert_eq!(result.content_length, 100);
        assert_eq!(
            result.range,
            Some(RangeResult {
                start: 900,
                end: 999,
                total: 1000
            })
        );
    }

    #[tokio::test]
    async fn range_past_end_is_invalid() {
        let backend = MemoryBackend::new(0, None);
        backend
            .put("tok1", "data.bin", body_of(b"short"), "application/octet-stream", 5)
            .await
            .unwrap();

        let err = backend
            .get("tok1", ObjectKind::Data, Some(RangeRequest::from_offset(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn metadata_and_data_resolve_independently() {
        let backend = MemoryBackend::new(0, None);
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

        let meta = backend
            .get("tok1", ObjectKind::Metadata, None)
            .await
            .unwrap();
        assert_eq!(meta.filename, "file.txt.metadata");
    }

    #[tokio::test]
    async fn delete_removes_both_objects_and_is_idempotent() {
        let backend = MemoryBackend::new(0, None);
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

        backend.delete("tok1").await.unwrap();
    }

    #[tokio::test]
    async fn retention_attaches_expiry_at_write_time() {
        let ttl = Duration::from_secs(3600);
        let backend = MemoryBackend::new(0, Some(ttl));
        let before = Utc::now();
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();
        let after = Utc::now();

        let entry = backend.entry("tok1/file.txt").await.unwrap();
        let expires_at = entry.expires_at.expect("expiry attached");
        let ttl = chrono::Duration::from_std(ttl).unwrap();
        assert!(expires_at >= before + ttl);
        assert!(expires_at <= after + ttl);
    }

    #[tokio::test]
    async fn no_retention_means_no_expiry_and_purge_keeps_everything() {
        let backend = MemoryBackend::new(0, None);
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();

        let entry = backend.entry("tok1/file.txt").await.unwrap();
        assert!(entry.expires_at.is_none());

        backend.purge(Duration::ZERO).await.unwrap();
        assert_eq!(backend.head("tok1", ObjectKind::Data).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let backend = MemoryBackend::new(0, Some(Duration::from_millis(10)));
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.purge(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(backend.head("tok1", ObjectKind::Data).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_applies_retention_to_entries_without_expiry() {
        let backend = MemoryBackend::new(0, None);
        backend
            .put("tok1", "file.txt", body_of(b"payload"), "text/plain", 7)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.purge(Duration::from_millis(10)).await.unwrap();

        assert_eq!(backend.head("tok1", ObjectKind::Data).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_limit_rejects_oversized_write() {
        let backend = MemoryBackend::new(10, None);
        let err = backend
            .put("tok1", "big.bin", body_of(&[0u8; 32]), "application/octet-stream", 32)
            .await
            .unwrap_err();
        assert!(!err.is_not_exist());
        assert!(err.to_string().contains("memory limit"));
    }

    #[tokio::test]
    async fn concurrent_writes_to_distinct_tokens_do_not_interfere() {
        let backend = Arc::new(MemoryBackend::new(0, None));

        let a = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .put("tok-a", "a.txt", body_of(b"aaaa"), "text/plain", 4)
                    .await
            })
        };
        let b = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .put("tok-b", "b.txt", body_of(b"bb"), "text/plain", 2)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let a = backend.get("tok-a", ObjectKind::Data, None).await.unwrap();
        assert_eq!(read_all(a.body).await, b"aaaa");
        let b = backend.get("tok-b", ObjectKind::Data, None).await.unwrap();
        assert_eq!(read_all(b.body).await, b"bb");
    }
}
