//! Object-key construction and resolution.
//!
//! Every upload token owns a key prefix `"<token>/"` holding at most
//! two objects: the uploaded file at `"<token>/<filename>"` and its
//! metadata sibling at `"<token>/<filename>.metadata"`.  The two are
//! told apart purely by the suffix; [`select_key`] encodes that rule
//! once so every backend resolves listings the same way.

use super::backend::ObjectKind;

/// Suffix that marks a token's metadata object.
pub const METADATA_SUFFIX: &str = ".metadata";

/// Key prefix under which all of a token's objects live.
pub fn token_prefix(token: &str) -> String {
    format!("{token}/")
}

/// Key of the data object for `(token, filename)`.
pub fn object_key(token: &str, filename: &str) -> String {
    format!("{token}/{filename}")
}

/// Key of the metadata object for `(token, filename)`.
pub fn metadata_key(token: &str, filename: &str) -> String {
    format!("{token}/{filename}{METADATA_SUFFIX}")
}

/// A key picked out of a token's listing, with the display filename
/// derived from its last path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Full backend key, e.g. `"<token>/<filename>"`.
    pub key: String,
    /// Last path segment of the key.
    pub filename: String,
}

/// Whether `key` is the kind of object the caller asked for.
fn matches_kind(key: &str, kind: ObjectKind) -> bool {
    match kind {
        ObjectKind::Metadata => key.ends_with(METADATA_SUFFIX),
        ObjectKind::Data => !key.ends_with(METADATA_SUFFIX),
    }
}

/// Select the first key in listing order whose suffix matches `kind`.
///
/// Returns `None` when the listing is empty or nothing matches; that is
/// the not-found signal, not an error.  Uniqueness is deliberately not
/// validated: callers own the invariant that a token holds at most one
/// data object and one metadata object, and the first match wins.
pub fn select_key<'a, I>(keys: I, kind: ObjectKind) -> Option<ResolvedKey>
where
    I: IntoIterator<Item = &'a str>,
{
    for key in keys {
        if matches_kind(key, kind) {
            return Some(ResolvedKey {
                key: key.to_string(),
                filename: display_filename(key).to_string(),
            });
        }
    }
    None
}

/// Last path segment of a key, shown to downloaders as the filename.
pub fn display_filename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

// -- Tests -------------------------------------------------------------------
