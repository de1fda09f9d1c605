//! Byte-range request/response translation.
//!
//! A [`RangeRequest`] travels into a read and is rendered as an HTTP
//! `Range` header value for the backend.  What the backend actually
//! served comes back as a [`RangeResult`] parsed from its
//! `Content-Range` response header.  When the backend ignored the range
//! (no `Content-Range`), the read carries no result and the caller
//! detects the full-object response by comparing lengths.

use crate::errors::{Result, StorageError};

/// A requested byte interval, inclusive on both ends.
///
/// `end == None` means "from `start` to the end of the object".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    /// First byte offset requested.
    pub start: u64,
    /// Last byte offset requested, inclusive.
    pub end: Option<u64>,
}

impl RangeRequest {
    /// A range covering `start..=end`.
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// A range from `start` to the end of the object.
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Render as an HTTP `Range` header value, e.g. `bytes=100-199`.
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Clamp against an object of `total` bytes, yielding the concrete
    /// interval a non-HTTP backend should serve.
    ///
    /// Fails with [`StorageError::InvalidRange`] when `start` lies at or
    /// beyond the end of the object.
    pub fn resolve(&self, total: u64) -> Result<RangeResult> {
        if self.start >= total {
            return Err(StorageError::InvalidRange {
                message: format!("start {} beyond object of {} bytes", self.start, total),
            });
        }
        let end = match self.end {
            Some(end) => end.min(total - 1),
            None => total - 1,
        };
        Ok(RangeResult {
            start: self.start,
            end,
            total,
        })
    }
}

/// The byte interval a backend actually served, plus the object's total
/// size, as reported by its `Content-Range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeResult {
    /// First byte offset served.
    pub start: u64,
    /// Last byte offset served, inclusive.
    pub end: u64,
    /// Total size of the object.
    pub total: u64,
}

impl RangeResult {
    /// Parse a `Content-Range` header value of the form
    /// `bytes 100-199/1000`.
    ///
    /// Returns `None` for anything else (including the `bytes */1000`
    /// unsatisfied form), in which case the caller treats the response
    /// as a full-object read.
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.strip_prefix("bytes ")?;
        let (interval, total) = rest.split_once('/')?;
        let (start, end) = interval.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        let total: u64 = total.trim().parse().ok()?;
        if end < start {
            return None;
        }
        Some(Self { start, end, total })
    }

    /// Number of bytes in the served interval.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// True when the interval is empty (cannot happen for parsed
    /// headers; kept for the `len`/`is_empty` pairing).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -- Tests -------------------------------------------------------------------
