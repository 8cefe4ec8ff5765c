//! Byte-range access to remote and local files.
//!
//! Every reader in this crate pulls bytes through a [`RangeFetcher`]. Fetchers
//! hold no per-request state and are shared as `Arc<dyn RangeFetcher>`.
//!
//! # Implementations
//!
//! - [`HttpFetcher`] - HTTP/HTTPS with `Range` headers (feature `http`)
//! - [`LocalFetcher`] - local paths and `file://` URLs
//! - [`MemoryFetcher`] - in-memory files, for fixtures and tests

#[cfg(feature = "http")]
mod http;
mod local;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpFetcher;
pub use local::LocalFetcher;
pub use memory::MemoryFetcher;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Byte range within a file. `end` is inclusive, as in an HTTP `Range`
/// header; `None` reads to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// `length` bytes starting at `start`.
    pub fn with_length(start: u64, length: u64) -> Self {
        Self {
            start,
            end: Some(start + length.max(1) - 1),
        }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end + 1 - self.start)
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Cuts this range out of a complete file body. Ranges running past the
    /// end are shortened; a start past the end gives an empty slice.
    pub fn slice(&self, body: &Bytes) -> Bytes {
        let len = body.len() as u64;
        let start = self.start.min(len);
        let end = self.end.map_or(len, |e| (e + 1).min(len));
        body.slice(start as usize..end.max(start) as usize)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-", self.start),
        }
    }
}

/// Reads byte ranges of a file addressed by URL or path.
///
/// Implementations may return fewer bytes than requested when the range runs
/// past the end of the file. Callers must treat the result as a prefix of the
/// requested range.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes>;
}
