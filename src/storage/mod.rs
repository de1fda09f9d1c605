//! Upload storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where uploaded
//! bytes physically live.  Implementations include local disk, process
//! memory, and S3-compatible object stores.

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod key;
pub mod local;
pub mod memory;
pub mod range;
pub mod s3;

/// Build the storage backend selected by `config.backend`.
pub async fn from_config(
    config: &StorageConfig,
) -> anyhow::Result<Arc<dyn backend::StorageBackend>> {
    let purge_ttl = config.purge_ttl();
    match config.backend.as_str() {
        "s3" => {
            let s3_config = config.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 's3' but storage.s3 config section is missing")
            })?;
            let backend = s3::S3Backend::new(s3_config, purge_ttl).await?;
            Ok(Arc::new(backend))
        }
        "memory" => {
            let max_size_bytes = config
                .memory
                .as_ref()
                .map(|memory| memory.max_size_bytes)
                .unwrap_or(0);
            Ok(Arc::new(memory::MemoryBackend::new(
                max_size_bytes,
                purge_ttl,
            )))
        }
        "local" => {
            let backend = local::LocalBackend::new(&config.local.root_dir)?;
            Ok(Arc::new(backend))
        }
        other => Err(anyhow::anyhow!("unknown storage backend '{other}'")),
    }
}
