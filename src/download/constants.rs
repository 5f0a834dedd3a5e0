//! Constants for the download module (defaults, timeouts, wire header names).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout per range request (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default chunk size in bytes (3 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 3 * 1024 * 1024;

/// Default number of range requests kept in flight.
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// Default number of automatic retries per chunk.
pub const DEFAULT_MAX_CHUNK_RETRY: u32 = 3;

/// Default progress floor (percent) reported before real progress exceeds it.
pub const DEFAULT_FIRST_CHUNK_PROGRESS: f64 = 10.0;

/// Upper bound on parallel range requests.
pub const MAX_PARALLEL_LIMIT: usize = 100;

/// Integrity tag header returned by the probe and echoed on body requests.
pub const FILE_HASH_HEADER: &str = "x-file-hash";

/// Filename used when the probe response carries no Content-Disposition.
pub const UNKNOWN_FILE_NAME: &str = "unknown";
