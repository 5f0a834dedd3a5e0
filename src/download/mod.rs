//! Chunked range download engine.
//!
//! A transfer fetches one resource as a series of HTTP range requests:
//!
//! 1. A probe request for `[0, chunk_size]` learns the total size, filename,
//!    content type and integrity tag from the response headers.
//! 2. The remaining bytes are planned as chunk-sized [`RangeUnit`]s.
//! 3. A dispatch loop keeps up to `max_parallel` of them in flight, retrying
//!    each failed chunk up to `max_chunk_auto_retry` times.
//! 4. Payloads are concatenated in index order and handed to an
//!    [`ArtifactSink`].
//!
//! Progress and lifecycle events are published on an [`EventBus`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chunkdl_core::download::{
//!     DirectorySink, DownloadOptions, EventKind, TransferController, TransferOutcome,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = TransferController::default()
//!     .with_sink(Arc::new(DirectorySink::new("./downloads")));
//! controller.update_option(DownloadOptions {
//!     url: Some("https://example.com/api/download/bigFile".to_string()),
//!     ..DownloadOptions::default()
//! })?;
//!
//! let _progress = controller.events().subscribe(EventKind::ChunkProgress, |event| {
//!     println!("{}% ({}/{})", event.percent, event.success_chunks, event.total_chunks);
//! });
//!
//! if let TransferOutcome::Succeeded { saved_to, .. } = controller.download().await? {
//!     println!("saved to {saved_to:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
pub mod constants;
mod controller;
mod error;
mod events;
mod fetcher;
mod filename;
mod meta;
mod scheduler;
mod sink;
mod unit;

pub use config::{DownloadOptions, TransferConfig};
pub use controller::{TransferController, TransferOutcome, TransferPhase};
pub use error::{FetchFailure, TransferError};
pub use events::{EventBus, EventKind, ProgressEvent, Subscription, compute_percent, format_percent};
pub use fetcher::{ChunkRequest, FetchedChunk, HttpRangeFetcher, RangeFetcher};
pub use meta::{ContentRange, ResourceMeta, parse_content_range};
pub use scheduler::{Completion, Launch, RoundOutcome, Scheduler, Step};
pub use sink::{Artifact, ArtifactSink, DirectorySink};
pub use unit::{ByteRange, RangeUnit, UnitSnapshot, UnitStatus, plan_body_ranges, probe_range};

// No module-local Result aliases: signatures spell out `Result<T, TransferError>`.
