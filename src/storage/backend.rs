//! Abstract upload storage trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The trait
//! works in terms of opaque byte streams addressed by upload token so
//! callers do not need to know the underlying medium.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::errors::Result;
use crate::storage::range::{RangeRequest, RangeResult};

/// A streaming object body.
///
/// Single-consumer and finite: reading it to the end consumes it, and
/// serving the same object again requires a fresh
/// [`StorageBackend::get`].  Dropping it releases the underlying
/// connection or file handle.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Which of a token's two objects an operation addresses.
///
/// The data object and its metadata sibling share the token's key
/// prefix and differ only by suffix; passing the kind explicitly keeps
/// that convention out of call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// The uploaded file itself.
    Data,
    /// The sibling object holding upload metadata.
    Metadata,
}

/// A successful streaming read.
pub struct GetResult {
    /// The object's bytes.
    pub body: ObjectBody,
    /// Display filename (last path segment of the resolved key).
    pub filename: String,
    /// Number of bytes `body` will yield.
    pub content_length: u64,
    /// The interval actually served, when the backend honored a range
    /// request.  `None` means the whole object came back and any
    /// requested range was ignored.
    pub range: Option<RangeResult>,
}

// `body` is an opaque `AsyncRead` stream that is not `Debug`, so the
// derive cannot apply; the manual impl omits it.
impl std::fmt::Debug for GetResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetResult")
            .field("filename", &self.filename)
            .field("content_length", &self.content_length)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// Async upload storage contract.
///
/// Implementations hold no mutable state beyond their configuration
/// and a concurrency-safe client handle, so any number of operations
/// may be in flight at once.  Cancelling a caller's future aborts the
/// underlying backend call.
pub trait StorageBackend: Send + Sync + 'static {
    /// Short identifying string for this backend (`"s3"`, `"local"`, ...).
    fn type_name(&self) -> &'static str;

    /// Whether ranged reads are supported.  Callers must not pass a
    /// range to [`StorageBackend::get`] when this reports `false`.
    fn is_range_supported(&self) -> bool;

    /// Content length of the stored object, or `Ok(0)` when the token
    /// has no matching object.
    fn head(
        &self,
        token: &str,
        kind: ObjectKind,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Open a streaming read of the stored object, applying `range` if
    /// present.  Fails with a not-found error (see
    /// [`crate::StorageError::is_not_exist`]) when the token has no
    /// matching object.
    fn get(
        &self,
        token: &str,
        kind: ObjectKind,
        range: Option<RangeRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<GetResult>> + Send + '_>>;

    /// Stream `body` to the backend under `"<token>/<filename>"`.
    ///
    /// `content_length` is advisory and may be ignored.  When a purge
    /// policy is configured, the object is written with an expiry of
    /// now plus the retention window.  Resolves only once the backend
    /// has confirmed durability; a failed multi-part transfer leaves no
    /// parts behind.
    fn put(
        &self,
        token: &str,
        filename: &str,
        body: ObjectBody,
        content_type: &str,
        content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove the token's metadata object and data object.
    ///
    /// Objects that are already absent are skipped; a delete that
    /// removes one object but fails on the other surfaces
    /// [`crate::StorageError::PartialDelete`].
    fn delete(&self, token: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove objects older than `older_than`.
    ///
    /// A no-op on backends that attach expiry at write time.  Active
    /// implementations finish the scan even when individual deletions
    /// fail, then report the failures.
    fn purge(
        &self,
        older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
