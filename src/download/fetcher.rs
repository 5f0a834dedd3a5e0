//! Range fetcher: one HTTP request for one byte range.
//!
//! [`RangeFetcher`] is the seam between the engine and the transport. The
//! engine only ever sees `Result<FetchedChunk, FetchFailure>` values: network
//! errors, timeouts, non-2xx statuses, cancellation and JSON error envelopes
//! all come back as [`FetchFailure`], never as a panic or a propagated
//! transport error.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, Method};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::FetchFailure;
use super::unit::ByteRange;
use crate::user_agent;

/// Everything needed to issue one range request.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Index of the unit being fetched.
    pub index: usize,
    /// Attempt number for this unit (1-based).
    pub attempt: u32,
    /// Byte range to request.
    pub range: ByteRange,
    /// Extra request headers (the `Range` header is added by the fetcher).
    pub headers: HeaderMap,
    /// JSON request body, if any.
    pub body: Option<serde_json::Value>,
}

/// A successfully fetched range.
#[derive(Debug, Clone)]
pub struct FetchedChunk {
    /// Body bytes.
    pub bytes: Bytes,
    /// Response headers (the probe's are parsed into resource metadata).
    pub headers: HeaderMap,
}

/// Fetches a single byte range.
///
/// Implementations must resolve promptly with [`FetchFailure::Cancelled`]
/// once `cancel` fires.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Issues the request described by `request`.
    async fn fetch(
        &self,
        request: &ChunkRequest,
        cancel: CancellationToken,
    ) -> Result<FetchedChunk, FetchFailure>;
}

/// [`RangeFetcher`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl Default for HttpRangeFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRangeFetcher {
    /// Creates a fetcher with default timeouts (30s connect, 5min per request).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a fetcher with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        // Range bodies are concatenated byte-for-byte, so transparent
        // decompression stays off.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(user_agent::default_download_user_agent())
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, request: &ChunkRequest) -> Result<FetchedChunk, FetchFailure> {
        let range = request.range;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .header(RANGE, range.header_value());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(range, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::http_status(range, status.as_u16()));
        }

        let headers = response.headers().clone();
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_transport_error(range, &e))?;
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        check_chunk_valid(range, &bytes)?;
        Ok(FetchedChunk { bytes, headers })
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    #[instrument(skip(self, request, cancel), fields(index = request.index, range = %request.range, attempt = request.attempt))]
    async fn fetch(
        &self,
        request: &ChunkRequest,
        cancel: CancellationToken,
    ) -> Result<FetchedChunk, FetchFailure> {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchFailure::cancelled(request.range)),
            result = self.send(request) => result,
        };
        match &result {
            Ok(chunk) => debug!(bytes = chunk.bytes.len(), "range fetched"),
            Err(failure) => debug!(reason = %failure, "range fetch failed"),
        }
        result
    }
}

fn map_transport_error(range: ByteRange, error: &reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::timeout(range)
    } else {
        FetchFailure::network(range, error)
    }
}

/// Error envelope some servers send with a 2xx status instead of range bytes.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

/// Rejects bodies that are a JSON error envelope rather than file content.
///
/// Only textual bodies that start with `{` and parse as an object carrying a
/// `code` field are rejected; everything else is treated as payload.
pub(crate) fn check_chunk_valid(range: ByteRange, body: &[u8]) -> Result<(), FetchFailure> {
    let Ok(text) = std::str::from_utf8(body) else {
        return Ok(());
    };
    let text = text.trim_start();
    if !text.starts_with('{') || !text.contains("\"code\"") {
        return Ok(());
    }
    match serde_json::from_str::<ErrorEnvelope>(text) {
        Ok(envelope) => {
            let message = envelope
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("error code {}", envelope.code));
            Err(FetchFailure::error_envelope(range, message))
        }
        Err(_) => Ok(()),
    }
}
