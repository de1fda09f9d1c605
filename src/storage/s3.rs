//! S3 storage backend.
//!
//! Persists uploads in an S3 bucket (or any S3-compatible store such
//! as MinIO via `endpoint_url`).
//!
//! Key mapping:
//!   Data:      `{token}/{filename}`
//!   Metadata:  `{token}/{filename}.metadata`
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless an explicit
//! key pair is configured.  When a retention policy is configured, the
//! expiry is attached to each object at upload time, so `purge` has
//! nothing left to do.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::backend::{GetResult, ObjectBody, ObjectKind, StorageBackend};
use super::key::{self, ResolvedKey};
use super::range::{RangeRequest, RangeResult};
use crate::config::S3StorageConfig;
use crate::errors::{Result, StorageError};

/// Part size for multi-part transfers (the S3 minimum).
const PART_SIZE: usize = 5 * 1024 * 1024;

/// Concurrent part uploads for a single multi-part transfer.
const MULTIPART_CONCURRENCY: usize = 20;

/// Worker count for one upload: sequential when multi-part transfers
/// are disabled by configuration.
fn upload_concurrency(disable_multipart: bool) -> usize {
    if disable_multipart {
        1
    } else {
        MULTIPART_CONCURRENCY
    }
}

/// Read up to one part's worth of bytes from `body`.
///
/// Short only at end of stream; an empty result means the stream is
/// exhausted.
async fn read_part(body: &mut ObjectBody) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(PART_SIZE);
    while buf.len() < PART_SIZE {
        let remaining = (PART_SIZE - buf.len()) as u64;
        let n = (&mut *body).take(remaining).read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}

/// Stores uploads in an S3 bucket.
pub struct S3Backend {
    /// AWS S3 SDK client; safe to share across in-flight operations.
    client: Client,
    /// Bucket holding all token prefixes.
    bucket: String,
    /// Retention window attached as an expiry to every write, if any.
    purge_ttl: Option<Duration>,
    /// Upload parts sequentially instead of with concurrent workers.
    disable_multipart: bool,
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Loads AWS credentials from the default credential chain unless
    /// an explicit key pair is present in `config`, and initializes the
    /// S3 client for the configured region and endpoint.
    pub async fn new(config: &S3StorageConfig, purge_ttl: Option<Duration>) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            loader = loader.endpoint_url(&config.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "dropstore-config",
            );
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();

        let client = Client::from_conf(s3_config);

        info!(
            "s3 storage backend initialized: bucket={} region={}",
            config.bucket, config.region
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            purge_ttl,
            disable_multipart: config.disable_multipart,
        })
    }

    /// Expiry timestamp for an object written now, when retention is
    /// configured.
    fn expiry(&self) -> Option<DateTime> {
        self.purge_ttl
            .map(|ttl| DateTime::from(SystemTime::now() + ttl))
    }

    /// List the token's prefix and pick the key matching `kind`.
    ///
    /// `Ok(None)` is the not-found signal; only the listing call itself
    /// can fail.
    async fn resolve(&self, token: &str, kind: ObjectKind) -> Result<Option<ResolvedKey>> {
        let prefix = key::token_prefix(token);

        debug!("list_objects_v2: bucket={} prefix={}", self.bucket, prefix);

        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .send()
            .await
            .map_err(|e| StorageError::unavailable("list_objects_v2", e))?;

        let keys = resp.contents().iter().filter_map(|object| object.key());
        Ok(key::select_key(keys, kind))
    }

    /// Upload `body` as a multi-part transfer and assemble the parts.
    ///
    /// `first` is the already-buffered first part.  Parts run in a
    /// [`JoinSet`] capped at the configured concurrency; dropping the
    /// future aborts the in-flight part uploads.
    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ObjectBody,
    ) -> Result<Vec<CompletedPart>> {
        let concurrency = upload_concurrency(self.disable_multipart);
        let mut tasks: JoinSet<Result<(i32, String)>> = JoinSet::new();
        let mut finished: Vec<(i32, String)> = Vec::new();
        let mut part_number = 0i32;
        let mut chunk = first;

        loop {
            part_number += 1;

            while tasks.len() >= concurrency {
                if let Some(joined) = tasks.join_next().await {
                    let part = joined
                        .map_err(|e| StorageError::unavailable("upload_part task", e))?;
                    finished.push(part?);
                }
            }

            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let object_key = object_key.to_string();
            let upload_id = upload_id.to_string();
            let data = chunk;
            tasks.spawn(async move {
                debug!(
                    "upload_part: bucket={} key={} part={} bytes={}",
                    bucket,
                    object_key,
                    part_number,
                    data.len()
                );
                let resp = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&object_key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| StorageError::unavailable("upload_part", e))?;
                Ok((part_number, resp.e_tag().unwrap_or_default().to_string()))
            });

            chunk = read_part(body)
                .await
                .map_err(|e| StorageError::unavailable("read upload body", e))?;
            if chunk.is_empty() {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let part = joined.map_err(|e| StorageError::unavailable("upload_part task", e))?;
            finished.push(part?);
        }

        finished.sort_by_key(|(number, _)| *number);
        Ok(finished
            .into_iter()
            .map(|(number, e_tag)| {
                CompletedPart::builder()
                    .part_number(number)
                    .e_tag(e_tag)
                    .build()
            })
            .collect())
    }

    /// Run the part uploads and complete the multi-part session.
    async fn upload_and_complete(
        &self,
        object_key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ObjectBody,
    ) -> Result<()> {
        let parts = self.upload_parts(object_key, upload_id, first, body).await?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::unavailable("complete_multipart_upload", e))?;

        Ok(())
    }
}

impl StorageBackend for S3Backend {
    fn type_name(&self) -> &'static str {
        "s3"
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
            let Some(resolved) = self.resolve(&token, kind).await? else {
                // Absent objects head as zero-size, not as an error.
                return Ok(0);
            };

            debug!("head_object: bucket={} key={}", self.bucket, resolved.key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&resolved.key)
                .send()
                .await
            {
                Ok(resp) => Ok(resp.content_length().unwrap_or(0).max(0) as u64),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(0)
                    } else {
                        Err(StorageError::unavailable("head_object", service_err))
                    }
                }
            }
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
            let Some(resolved) = self.resolve(&token, kind).await? else {
                return Err(StorageError::NotFound { token });
            };

            debug!("get_object: bucket={} key={}", self.bucket, resolved.key);

            let mut req = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&resolved.key);
            if let Some(range) = range {
                req = req.range(range.to_header());
            }

            let resp = req.send().await.map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound {
                        token: token.clone(),
                    }
                } else {
                    StorageError::unavailable("get_object", service_err)
                }
            })?;

            let content_length = resp.content_length().unwrap_or(0).max(0) as u64;
            let served = resp.content_range().and_then(RangeResult::parse);
            let body = resp.body;

            Ok(GetResult {
                body: Box::pin(body.into_async_read()),
                filename: resolved.filename,
                content_length,
                range: served,
            })
        })
    }

    fn put(
        &self,
        token: &str,
        filename: &str,
        mut body: ObjectBody,
        content_type: &str,
        _content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let object_key = key::object_key(token, filename);
        let content_type = content_type.to_string();
        Box::pin(async move {
            info!("uploading {} to s3 bucket {}", object_key, self.bucket);

            let expires = self.expiry();

            let first = read_part(&mut body)
                .await
                .map_err(|e| StorageError::unavailable("read upload body", e))?;

            // Bodies that fit in a single part skip the multi-part session.
            if first.len() < PART_SIZE {
                debug!(
                    "put_object: bucket={} key={} bytes={}",
                    self.bucket,
                    object_key,
                    first.len()
                );
                let mut req = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&object_key)
                    .content_type(&content_type)
                    .body(ByteStream::from(first));
                if let Some(expires) = expires {
                    req = req.expires(expires);
                }
                req.send()
                    .await
                    .map_err(|e| StorageError::unavailable("put_object", e))?;
                return Ok(());
            }

            let mut create = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&object_key)
                .content_type(&content_type);
            if let Some(expires) = expires {
                create = create.expires(expires);
            }
            let created = create
                .send()
                .await
                .map_err(|e| StorageError::unavailable("create_multipart_upload", e))?;
            let upload_id = created
                .upload_id()
                .ok_or_else(|| {
                    StorageError::unavailable("create_multipart_upload", "no upload id returned")
                })?
                .to_string();

            match self
                .upload_and_complete(&object_key, &upload_id, first, &mut body)
                .await
            {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Abort so no orphaned parts accumulate in the bucket.
                    warn!(
                        "aborting multipart upload {} for {}: {}",
                        upload_id, object_key, e
                    );
                    if let Err(abort_err) = self
                        .client
                        .abort_multipart_upload()
                        .bucket(&self.bucket)
                        .key(&object_key)
                        .upload_id(&upload_id)
                        .send()
                        .await
                    {
                        warn!("failed to abort multipart upload {}: {}", upload_id, abort_err);
                    }
                    Err(e)
                }
            }
        })
    }

    fn delete(&self, token: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            // Metadata first, then data; an absent object is a no-op,
            // not a failure.
            let mut metadata_removed = false;
            if let Some(resolved) = self.resolve(&token, ObjectKind::Metadata).await? {
                debug!("delete_object: bucket={} key={}", self.bucket, resolved.key);
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&resolved.key)
                    .send()
                    .await
                    .map_err(|e| StorageError::unavailable("delete_object (metadata)", e))?;
                metadata_removed = true;
            }

            match self.resolve(&token, ObjectKind::Data).await {
                Ok(Some(resolved)) => {
                    debug!("delete_object: bucket={} key={}", self.bucket, resolved.key);
                    if let Err(e) = self
                        .client
                        .delete_object()
                        .bucket(&self.bucket)
                        .key(&resolved.key)
                        .send()
                        .await
                    {
                        let err = StorageError::unavailable("delete_object (data)", e);
                        if metadata_removed {
                            return Err(StorageError::PartialDelete {
                                token,
                                message: err.to_string(),
                            });
                        }
                        return Err(err);
                    }
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    if metadata_removed {
                        return Err(StorageError::PartialDelete {
                            token,
                            message: e.to_string(),
                        });
                    }
                    Err(e)
                }
            }
        })
    }

    fn purge(
        &self,
        _older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            // Expiry is attached per-object at write time; the bucket
            // reclaims expired objects on its own.
            debug!("purge: no-op for s3 backend");
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------
