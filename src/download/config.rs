//! Transfer options and their validated form.
//!
//! [`DownloadOptions`] is the loose, all-optional configuration surface
//! (deserializable from JSON with the camelCase option names callers already
//! use). [`TransferConfig`] is what a transfer actually runs with: defaults
//! filled in, URL, method and headers parsed.

use std::collections::BTreeMap;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_FIRST_CHUNK_PROGRESS, DEFAULT_MAX_CHUNK_RETRY,
    DEFAULT_MAX_PARALLEL, FILE_HASH_HEADER, MAX_PARALLEL_LIMIT,
};
use super::error::TransferError;
use super::fetcher::ChunkRequest;
use super::unit::ByteRange;

/// Caller-facing transfer options; unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadOptions {
    /// Download endpoint.
    pub url: Option<String>,
    /// Request body template, merged with per-chunk metadata.
    pub data: Option<Map<String, Value>>,
    /// Extra request headers.
    pub headers: Option<BTreeMap<String, String>>,
    /// Chunk size in bytes (default 3 MiB).
    pub chunk_size_byte: Option<u64>,
    /// Maximum range requests in flight (default 10).
    pub max_parallel: Option<usize>,
    /// Automatic retries per chunk (default 3).
    pub max_chunk_auto_retry: Option<u32>,
    /// Progress floor in percent (default 10).
    pub first_chunk_progress: Option<f64>,
    /// HTTP method (default `POST`).
    pub method: Option<String>,
}

impl DownloadOptions {
    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed JSON or mistyped fields.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns `self` with every field set in `overrides` replaced.
    #[must_use]
    pub fn overlay(self, overrides: DownloadOptions) -> Self {
        Self {
            url: overrides.url.or(self.url),
            data: overrides.data.or(self.data),
            headers: overrides.headers.or(self.headers),
            chunk_size_byte: overrides.chunk_size_byte.or(self.chunk_size_byte),
            max_parallel: overrides.max_parallel.or(self.max_parallel),
            max_chunk_auto_retry: overrides.max_chunk_auto_retry.or(self.max_chunk_auto_retry),
            first_chunk_progress: overrides.first_chunk_progress.or(self.first_chunk_progress),
            method: overrides.method.or(self.method),
        }
    }
}

/// Validated configuration a transfer runs with.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Download endpoint.
    pub url: String,
    /// HTTP method for every range request.
    pub method: Method,
    /// Request body template.
    pub data: Option<Map<String, Value>>,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Maximum range requests in flight.
    pub max_parallel: usize,
    /// Automatic retries per chunk.
    pub max_chunk_auto_retry: u32,
    /// Progress floor in percent.
    pub first_chunk_progress: f64,
}

impl TryFrom<DownloadOptions> for TransferConfig {
    type Error = TransferError;

    fn try_from(options: DownloadOptions) -> Result<Self, Self::Error> {
        let url = options
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TransferError::invalid_option("url", "a download URL is required"))?;
        Url::parse(&url)
            .map_err(|e| TransferError::invalid_option("url", format!("`{url}`: {e}")))?;

        let method = match options.method.as_deref() {
            None => Method::POST,
            Some(raw) => Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| TransferError::invalid_option("method", format!("`{raw}`")))?,
        };

        let chunk_size = options.chunk_size_byte.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(TransferError::invalid_option(
                "chunkSizeByte",
                "must be at least 1 byte",
            ));
        }

        let max_parallel = options.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL);
        if !(1..=MAX_PARALLEL_LIMIT).contains(&max_parallel) {
            return Err(TransferError::invalid_option(
                "maxParallel",
                format!("{max_parallel} is outside 1..={MAX_PARALLEL_LIMIT}"),
            ));
        }

        let first_chunk_progress = options
            .first_chunk_progress
            .unwrap_or(DEFAULT_FIRST_CHUNK_PROGRESS);
        if !(0.0..=100.0).contains(&first_chunk_progress) {
            return Err(TransferError::invalid_option(
                "firstChunkProgress",
                format!("{first_chunk_progress} is outside 0..=100"),
            ));
        }

        Ok(Self {
            url,
            method,
            data: options.data,
            headers: parse_headers(options.headers.unwrap_or_default())?,
            chunk_size,
            max_parallel,
            max_chunk_auto_retry: options
                .max_chunk_auto_retry
                .unwrap_or(DEFAULT_MAX_CHUNK_RETRY),
            first_chunk_progress,
        })
    }
}

fn parse_headers(raw: BTreeMap<String, String>) -> Result<HeaderMap, TransferError> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| TransferError::invalid_option("headers", format!("bad name `{name}`")))?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|_| {
            TransferError::invalid_option("headers", format!("bad value for `{name}`"))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

impl TransferConfig {
    /// Request for the probe (unit 0): the body template is sent as-is.
    #[must_use]
    pub fn probe_request(&self, range: ByteRange) -> ChunkRequest {
        ChunkRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            index: 0,
            attempt: 1,
            range,
            headers: self.headers.clone(),
            body: self.carries_body().then(|| {
                Value::Object(self.data.clone().unwrap_or_default())
            }),
        }
    }

    /// Request for a body chunk.
    ///
    /// The body template is merged with `fetchCount`, `chunkIndex` and
    /// `chunkRange`, and the integrity tag from the probe is echoed so the
    /// server can correlate chunks.
    #[must_use]
    pub fn chunk_request(
        &self,
        index: usize,
        attempt: u32,
        range: ByteRange,
        integrity_tag: Option<&str>,
    ) -> ChunkRequest {
        let mut headers = self.headers.clone();
        if let Some(tag) = integrity_tag
            && let Ok(value) = HeaderValue::from_str(tag)
        {
            headers.insert(FILE_HASH_HEADER, value);
        }

        let body = self.carries_body().then(|| {
            let mut body = self.data.clone().unwrap_or_default();
            body.insert("fetchCount".to_string(), Value::from(attempt));
            body.insert("chunkIndex".to_string(), Value::from(index));
            body.insert("chunkRange".to_string(), Value::from(range.to_string()));
            Value::Object(body)
        });

        ChunkRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            index,
            attempt,
            range,
            headers,
            body,
        }
    }

    fn carries_body(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn options(url: &str) -> DownloadOptions {
        DownloadOptions {
            url: Some(url.to_string()),
            ..DownloadOptions::default()
        }
    }

    #[test]
    fn test_defaults_fill_unset_fields() {
        let config = TransferConfig::try_from(options("http://127.0.0.1/file")).unwrap();
        assert_eq!(config.chunk_size, 3 * 1024 * 1024);
        assert_eq!(config.max_parallel, 10);
        assert_eq!(config.max_chunk_auto_retry, 3);
        assert!((config.first_chunk_progress - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.method, Method::POST);
    }

    #[test]
    fn test_options_deserialize_from_camel_case_json() {
        let json = r#"{
            "url": "http://127.0.0.1/api/download/bigFile",
            "data": {"fileId": 42},
            "headers": {"authorization": "Bearer t"},
            "chunkSizeByte": 1024,
            "maxParallel": 2,
            "maxChunkAutoRetry": 5,
            "firstChunkProgress": 0
        }"#;
        let opts = DownloadOptions::from_json_str(json).unwrap();
        assert_eq!(opts.chunk_size_byte, Some(1024));
        assert_eq!(opts.max_parallel, Some(2));

        let config = TransferConfig::try_from(opts).unwrap();
        assert_eq!(config.max_chunk_auto_retry, 5);
        assert_eq!(config.headers["authorization"], "Bearer t");
    }

    #[test]
    fn test_missing_url_is_invalid() {
        let err = TransferConfig::try_from(DownloadOptions::default()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidOption { field: "url", .. }));
    }

    #[test]
    fn test_zero_chunk_size_and_parallelism_are_invalid() {
        let mut opts = options("http://127.0.0.1/f");
        opts.chunk_size_byte = Some(0);
        assert!(TransferConfig::try_from(opts).is_err());

        let mut opts = options("http://127.0.0.1/f");
        opts.max_parallel = Some(0);
        assert!(TransferConfig::try_from(opts).is_err());
    }

    #[test]
    fn test_overlay_prefers_overrides() {
        let base = DownloadOptions {
            url: Some("http://a/".to_string()),
            max_parallel: Some(4),
            ..DownloadOptions::default()
        };
        let merged = base.overlay(DownloadOptions {
            max_parallel: Some(8),
            ..DownloadOptions::default()
        });
        assert_eq!(merged.url.as_deref(), Some("http://a/"));
        assert_eq!(merged.max_parallel, Some(8));
    }

    #[test]
    fn test_chunk_request_merges_metadata_and_echoes_tag() {
        let mut opts = options("http://127.0.0.1/f");
        let mut data = Map::new();
        data.insert("fileId".to_string(), Value::from(7));
        opts.data = Some(data);
        let config = TransferConfig::try_from(opts).unwrap();

        let request = config.chunk_request(2, 3, ByteRange::new(11, 20), Some("h1"));
        let body = request.body.unwrap();
        assert_eq!(body["fileId"], 7);
        assert_eq!(body["fetchCount"], 3);
        assert_eq!(body["chunkIndex"], 2);
        assert_eq!(body["chunkRange"], "11-20");
        assert_eq!(request.headers[FILE_HASH_HEADER], "h1");
    }

    #[test]
    fn test_get_requests_carry_no_body() {
        let mut opts = options("http://127.0.0.1/f");
        opts.method = Some("get".to_string());
        let config = TransferConfig::try_from(opts).unwrap();
        assert_eq!(config.method, Method::GET);
        assert!(config.probe_request(ByteRange::new(0, 9)).body.is_none());
        assert!(
            config
                .chunk_request(1, 1, ByteRange::new(10, 19), None)
                .body
                .is_none()
        );
    }
}
