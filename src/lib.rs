//! dropstore — pluggable storage backends for token-addressed uploads.
//!
//! A file-transfer service hands every upload an opaque token; this
//! crate persists the uploaded file and its metadata sibling under that
//! token and serves them back, uniformly across local disk, process
//! memory, and S3-compatible object stores.  See
//! [`storage::backend::StorageBackend`] for the contract and
//! [`storage::from_config`] for backend selection.

pub mod config;
pub mod errors;
pub mod logging;
pub mod storage;

pub use errors::{Result, StorageError};
pub use storage::backend::{GetResult, ObjectBody, ObjectKind, StorageBackend};
pub use storage::from_config;
pub use storage::range::{RangeRequest, RangeResult};
