//! Error types for the download module.
//!
//! Two layers of failure exist. [`FetchFailure`] is the value a single range
//! request resolves to when it does not succeed; it never escapes the
//! scheduler and only feeds the per-chunk retry budget. [`TransferError`] is
//! raised to the caller of `download()` for configuration, protocol and
//! persistence problems.

use thiserror::Error;

use super::unit::ByteRange;

/// Why a single range request did not produce a usable chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching bytes {range}: {reason}")]
    Network {
        /// The requested byte range.
        range: ByteRange,
        /// Rendered transport error.
        reason: String,
    },

    /// Request timed out before completion.
    #[error("timeout fetching bytes {range}")]
    Timeout {
        /// The requested byte range.
        range: ByteRange,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching bytes {range}")]
    HttpStatus {
        /// The requested byte range.
        range: ByteRange,
        /// The HTTP status code.
        status: u16,
    },

    /// The attempt's cancellation token fired before the body arrived.
    #[error("fetch of bytes {range} was cancelled")]
    Cancelled {
        /// The requested byte range.
        range: ByteRange,
    },

    /// The server answered with a JSON error envelope instead of binary data.
    #[error("server returned an error envelope for bytes {range}: {message}")]
    ErrorEnvelope {
        /// The requested byte range.
        range: ByteRange,
        /// Message carried by the envelope.
        message: String,
    },
}

impl FetchFailure {
    /// Creates a network error from a reqwest error.
    pub fn network(range: ByteRange, source: &reqwest::Error) -> Self {
        Self::Network {
            range,
            reason: source.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(range: ByteRange) -> Self {
        Self::Timeout { range }
    }

    /// Creates an HTTP status error.
    pub fn http_status(range: ByteRange, status: u16) -> Self {
        Self::HttpStatus { range, status }
    }

    /// Creates a cancellation error.
    pub fn cancelled(range: ByteRange) -> Self {
        Self::Cancelled { range }
    }

    /// Creates an error-envelope failure.
    pub fn error_envelope(range: ByteRange, message: impl Into<String>) -> Self {
        Self::ErrorEnvelope {
            range,
            message: message.into(),
        }
    }

    /// Human-readable reason, as recorded on the failed chunk.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Returns true if the failure came from the attempt being cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised to the caller of the transfer controller.
#[derive(Debug, Error)]
pub enum TransferError {
    /// `download()` was called before `update_option()`.
    #[error("transfer options are not set; call update_option() before download()")]
    NotConfigured,

    /// An option value cannot drive a transfer.
    #[error("invalid option `{field}`: {reason}")]
    InvalidOption {
        /// Option name as it appears in the configuration surface.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The probe response does not follow the range protocol.
    #[error("chunk protocol error: {reason}")]
    Protocol {
        /// What was missing or malformed.
        reason: String,
    },

    /// The assembled artifact could not be handed to the sink.
    #[error("failed to persist {file_name}: {source}")]
    Persist {
        /// Name the artifact was being saved under.
        file_name: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Creates an invalid option error.
    pub fn invalid_option(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persist(file_name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persist {
            file_name: file_name.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failure_http_status_display() {
        let failure = FetchFailure::http_status(ByteRange::new(10, 20), 503);
        let msg = failure.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("10-20"), "Expected range in: {msg}");
    }

    #[test]
    fn test_fetch_failure_envelope_carries_server_message() {
        let failure = FetchFailure::error_envelope(ByteRange::new(0, 9), "file expired");
        assert!(failure.reason().contains("file expired"));
        assert!(!failure.is_cancelled());
    }

    #[test]
    fn test_fetch_failure_cancelled_is_detected() {
        let failure = FetchFailure::cancelled(ByteRange::new(0, 9));
        assert!(failure.is_cancelled());
        assert!(failure.to_string().contains("cancelled"));
    }

    #[test]
    fn test_transfer_error_not_configured_mentions_update_option() {
        let msg = TransferError::NotConfigured.to_string();
        assert!(msg.contains("update_option"), "Expected hint in: {msg}");
    }

    #[test]
    fn test_transfer_error_persist_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let msg = TransferError::persist("report.pdf", io_error).to_string();
        assert!(msg.contains("report.pdf"), "Expected file name in: {msg}");
        assert!(msg.contains("access denied"), "Expected cause in: {msg}");
    }
}
