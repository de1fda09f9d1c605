//! Storage error taxonomy.
//!
//! Every fallible storage operation returns [`StorageError`].  The
//! variants mirror the three outcomes upper layers care about: the
//! object legitimately is not there ([`StorageError::NotFound`]), the
//! backend could not be reached ([`StorageError::BackendUnavailable`]),
//! or a two-object delete stopped halfway
//! ([`StorageError::PartialDelete`]).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object is stored for the token, or the backend confirmed the
    /// key is absent.  Not a hard failure; callers test for it with
    /// [`StorageError::is_not_exist`].
    #[error("no stored object for token {token}")]
    NotFound { token: String },

    /// The object store could not serve the request (network, auth, or
    /// service error).  Always propagated, never swallowed.
    #[error("storage backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The metadata object was removed but the data object was not (or
    /// vice versa), leaving the token half-deleted.
    #[error("incomplete delete for token {token}: {message}")]
    PartialDelete { token: String, message: String },

    /// The requested byte range starts beyond the end of the object.
    #[error("requested range is not satisfiable: {message}")]
    InvalidRange { message: String },
}

impl StorageError {
    /// Whether this error specifically means "the requested object does
    /// not exist", as opposed to a transport or permission failure.
    ///
    /// Lets callers apply not-found handling without matching on the
    /// backend's own error vocabulary.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Wrap a backend client error with the operation that produced it.
    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        StorageError::BackendUnavailable {
            message: format!("{context}: {err}"),
        }
    }
}
