//! Resource metadata carried by the probe response.
//!
//! The probe is the only request whose headers are interpreted: they name the
//! artifact, type it, tag it for server-side correlation, and, through
//! `Content-Range`, reveal the authoritative total size that parametrizes
//! the rest of the plan.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_RANGE, CONTENT_TYPE, HeaderMap};
use tracing::debug;

use super::TransferError;
use super::constants::{FILE_HASH_HEADER, UNKNOWN_FILE_NAME};
use super::filename::{fallback_filename_from_url, parse_content_disposition};

/// Pattern for `Content-Range: bytes <start>-<end>/<total>`.
#[allow(clippy::expect_used)]
static CONTENT_RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bytes\s+(\d+)-(\d+)/(\d+)").expect("content-range regex is valid") // Static pattern, safe to panic
});

/// Parsed `Content-Range` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset served.
    pub start: u64,
    /// Last byte offset served (inclusive).
    pub end: u64,
    /// Total size of the resource.
    pub total: u64,
}

/// Parses a `bytes <start>-<end>/<total>` header value.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let captures = CONTENT_RANGE_PATTERN.captures(value)?;
    let number = |i: usize| captures.get(i)?.as_str().parse::<u64>().ok();
    Some(ContentRange {
        start: number(1)?,
        end: number(2)?,
        total: number(3)?,
    })
}

/// Metadata of the remote resource, immutable once the probe succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Decoded artifact filename.
    pub file_name: String,
    /// Content type reported by the server, if any.
    pub content_type: Option<String>,
    /// Authoritative total size in bytes.
    pub total_bytes: u64,
    /// Integrity/identity tag echoed on body requests.
    pub integrity_tag: Option<String>,
}

impl ResourceMeta {
    /// Extracts metadata from probe response headers.
    ///
    /// The filename falls back to the URL's last path segment, then to a
    /// placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] if `Content-Range` is absent or
    /// does not match `bytes <start>-<end>/<total>`.
    pub fn from_headers(headers: &HeaderMap, url: &str) -> Result<Self, TransferError> {
        let content_range = header_str(headers, CONTENT_RANGE.as_str())
            .ok_or_else(|| TransferError::protocol("content-range not found"))?;
        let range = parse_content_range(content_range).ok_or_else(|| {
            TransferError::protocol(format!("unparsable content-range `{content_range}`"))
        })?;

        let file_name = header_str(headers, CONTENT_DISPOSITION.as_str())
            .and_then(parse_content_disposition)
            .or_else(|| fallback_filename_from_url(url))
            .unwrap_or_else(|| UNKNOWN_FILE_NAME.to_string());

        let meta = Self {
            file_name,
            content_type: header_str(headers, CONTENT_TYPE.as_str()).map(str::to_string),
            total_bytes: range.total,
            integrity_tag: header_str(headers, FILE_HASH_HEADER).map(str::to_string),
        };
        debug!(
            file_name = %meta.file_name,
            total_bytes = meta.total_bytes,
            served_start = range.start,
            served_end = range.end,
            integrity_tag = meta.integrity_tag.as_deref().unwrap_or(""),
            "parsed probe metadata"
        );
        Ok(meta)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
