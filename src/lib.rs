//! Chunkdl Core Library
//!
//! Downloads large files from servers that only hand them out in pieces:
//! the resource is fetched as parallel HTTP range requests, each chunk is
//! retried on its own, and the pieces are reassembled in order.
//!
//! # Architecture
//!
//! Everything lives in [`download`]:
//! - `unit` / `scheduler` - per-chunk state and the bounded, index-ordered
//!   scheduling policy
//! - `fetcher` - one HTTP request for one byte range
//! - `controller` - probe, plan, dispatch, assemble; `terminate()` and `retry()`
//! - `events` - progress and lifecycle publish/subscribe
//! - `sink` - where finished artifacts go

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

// Re-export commonly used types
pub use download::{
    Artifact, ArtifactSink, DirectorySink, DownloadOptions, EventBus, EventKind,
    HttpRangeFetcher, ProgressEvent, RangeFetcher, TransferController, TransferError,
    TransferOutcome, TransferPhase,
};
