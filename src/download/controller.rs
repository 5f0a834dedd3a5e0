//! Transfer controller: the public face of the engine.
//!
//! A [`TransferController`] runs one transfer at a time. `download()` probes
//! the resource with unit 0, plans the remaining byte ranges and drives a
//! single dispatch loop that keeps up to `max_parallel` range fetches in a
//! [`JoinSet`], feeding every completion back through the [`Scheduler`].
//!
//! All transfer state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`, so `terminate()` can be called from any task (a
//! ctrl-c handler, a UI callback) while `download()` is in progress. Each
//! fresh transfer gets a new generation number; a dispatch loop that is
//! winding down after `terminate()` never touches a newer transfer.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::{DownloadOptions, TransferConfig};
use super::constants::DEFAULT_FIRST_CHUNK_PROGRESS;
use super::error::{FetchFailure, TransferError};
use super::events::{EventBus, EventKind, ProgressEvent, compute_percent, format_percent};
use super::fetcher::{HttpRangeFetcher, RangeFetcher};
use super::meta::ResourceMeta;
use super::scheduler::{Completion, RoundOutcome, Scheduler, Step};
use super::sink::{Artifact, ArtifactSink};
use super::unit::{RangeUnit, UnitSnapshot, UnitStatus, plan_body_ranges, probe_range};

/// Where the current (or last) transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// No transfer has started.
    Idle,
    /// Unit 0 is being fetched.
    Probing,
    /// Body units are being scheduled.
    Fetching,
    /// Payloads are being concatenated and persisted.
    Assembling,
    /// `download-success` was emitted.
    Succeeded,
    /// `download-fail` was emitted; `retry()` may resume.
    Failed,
    /// `terminate()` stopped the transfer.
    Terminated,
}

impl TransferPhase {
    /// True while a transfer is in progress.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Probing | Self::Fetching | Self::Assembling)
    }

    fn terminal_event(self) -> Option<EventKind> {
        match self {
            Self::Succeeded => Some(EventKind::DownloadSuccess),
            Self::Failed => Some(EventKind::DownloadFail),
            Self::Terminated => Some(EventKind::Terminate),
            Self::Idle | Self::Probing | Self::Fetching | Self::Assembling => None,
        }
    }
}

/// How a `download()` or `retry()` call ended.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Every chunk arrived and the artifact was handed to the sink.
    Succeeded {
        /// The assembled artifact.
        artifact: Artifact,
        /// Where the sink stored it, if it reports a path.
        saved_to: Option<PathBuf>,
    },
    /// The probe failed or a chunk exhausted its retry budget.
    Failed {
        /// Why the transfer stopped.
        reason: String,
    },
    /// The transfer was stopped by `terminate()`.
    Terminated,
    /// Another transfer is running; the call had no effect.
    Busy,
    /// `retry()` found no failed transfer to resume.
    NothingToRetry,
}

#[derive(Debug)]
struct TransferState {
    generation: u64,
    phase: TransferPhase,
    units: Vec<RangeUnit>,
    meta: Option<ResourceMeta>,
    config: Option<Arc<TransferConfig>>,
    halt: CancellationToken,
}

impl TransferState {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn event(&self, status: EventKind) -> ProgressEvent {
        let total_chunks = self.units.len();
        let success_chunks = self
            .units
            .iter()
            .filter(|u| u.status() == UnitStatus::Succeeded)
            .count();
        let floor = self
            .config
            .as_ref()
            .map_or(DEFAULT_FIRST_CHUNK_PROGRESS, |c| c.first_chunk_progress);
        let percent_num = compute_percent(success_chunks, total_chunks, floor);
        ProgressEvent {
            status,
            total_chunks,
            success_chunks,
            percent: format_percent(percent_num),
            percent_num,
            file_name: self
                .meta
                .as_ref()
                .map(|m| m.file_name.clone())
                .unwrap_or_default(),
            file_total_bytes: self.meta.as_ref().map_or(0, |m| m.total_bytes),
        }
    }
}

/// Orchestrates chunked range transfers and publishes their progress.
pub struct TransferController {
    fetcher: Arc<dyn RangeFetcher>,
    sink: Option<Arc<dyn ArtifactSink>>,
    events: EventBus,
    config: Mutex<Option<Arc<TransferConfig>>>,
    state: Mutex<TransferState>,
}

impl std::fmt::Debug for TransferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferController")
            .field("phase", &self.phase())
            .field("events", &self.events)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for TransferController {
    fn default() -> Self {
        Self::new(Arc::new(HttpRangeFetcher::new()))
    }
}

impl TransferController {
    /// Creates a controller fetching through `fetcher`, with no sink.
    #[must_use]
    pub fn new(fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self {
            fetcher,
            sink: None,
            events: EventBus::new(),
            config: Mutex::new(None),
            state: Mutex::new(TransferState {
                generation: 0,
                phase: TransferPhase::Idle,
                units: Vec::new(),
                meta: None,
                config: None,
                halt: CancellationToken::new(),
            }),
        }
    }

    /// Hands finished artifacts to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Event bus progress and lifecycle events are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validates `options` (merged over defaults) and stores them for the
    /// next `download()`. A running transfer keeps the options it started with.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidOption`] when a value cannot drive a
    /// transfer; previously stored options are kept in that case.
    pub fn update_option(&self, options: DownloadOptions) -> Result<(), TransferError> {
        let config = TransferConfig::try_from(options)?;
        debug!(
            url = %config.url,
            chunk_size = config.chunk_size,
            max_parallel = config.max_parallel,
            retries = config.max_chunk_auto_retry,
            "transfer options updated"
        );
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(config));
        Ok(())
    }

    /// Phase of the current (or last) transfer.
    #[must_use]
    pub fn phase(&self) -> TransferPhase {
        self.lock_state().phase
    }

    /// Snapshot of every unit in the current plan, in index order.
    #[must_use]
    pub fn units(&self) -> Vec<UnitSnapshot> {
        self.lock_state().units.iter().map(RangeUnit::snapshot).collect()
    }

    /// Resource metadata learned from the probe, if it succeeded.
    #[must_use]
    pub fn resource_meta(&self) -> Option<ResourceMeta> {
        self.lock_state().meta.clone()
    }

    /// Starts a fresh transfer and drives it to a terminal state.
    ///
    /// Returns [`TransferOutcome::Busy`] without side effects while another
    /// transfer is running.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotConfigured`] if `update_option()` was never called
    /// - [`TransferError::Protocol`] if the probe response carries no usable
    ///   `Content-Range` (a `download-fail` event is emitted as well)
    /// - [`TransferError::Persist`] if the sink rejects the artifact (a
    ///   `download-fail` event is emitted as well)
    #[instrument(skip(self))]
    pub async fn download(&self) -> Result<TransferOutcome, TransferError> {
        let config = self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransferError::NotConfigured)?;

        let (generation, request, token, halt) = {
            let mut state = self.lock_state();
            if state.phase.is_running() {
                debug!(phase = ?state.phase, "download() ignored, transfer already running");
                return Ok(TransferOutcome::Busy);
            }
            state.generation += 1;
            state.phase = TransferPhase::Probing;
            state.meta = None;
            state.config = Some(Arc::clone(&config));
            state.halt = CancellationToken::new();

            let mut probe = RangeUnit::new(0, probe_range(config.chunk_size));
            let token = probe.begin_attempt();
            let request = config.probe_request(probe.range());
            state.units = vec![probe];
            (state.generation, request, token, state.halt.clone())
        };
        let _abandon = AbandonGuard::new(&self.state, generation);
        info!(url = %config.url, generation, "transfer started");
        self.publish(generation, EventKind::ChunkProgress);

        let result = tokio::select! {
            biased;
            () = halt.cancelled() => Err(FetchFailure::cancelled(request.range)),
            result = self.fetcher.fetch(&request, token) => result,
        };

        let next = {
            let mut state = self.lock_state();
            if !state.is_current(generation) || state.phase != TransferPhase::Probing {
                return Ok(TransferOutcome::Terminated);
            }
            match result {
                Err(failure) => {
                    if let Some(unit) = state.units.first_mut() {
                        unit.fail(failure.reason());
                    }
                    Err(ProbeError::Fetch(failure.reason()))
                }
                Ok(chunk) => match ResourceMeta::from_headers(&chunk.headers, &config.url) {
                    Err(error) => {
                        if let Some(unit) = state.units.first_mut() {
                            unit.fail(error.to_string());
                        }
                        Err(ProbeError::Protocol(error))
                    }
                    Ok(meta) => {
                        if let Some(unit) = state.units.first_mut() {
                            unit.succeed(chunk.bytes);
                        }
                        let plan = plan_body_ranges(config.chunk_size, meta.total_bytes);
                        info!(
                            file_name = %meta.file_name,
                            total_bytes = meta.total_bytes,
                            chunks = plan.len() + 1,
                            "probe complete"
                        );
                        state.units.extend(
                            plan.into_iter()
                                .enumerate()
                                .map(|(offset, range)| RangeUnit::new(offset + 1, range)),
                        );
                        state.meta = Some(meta);
                        state.phase = if state.units.len() == 1 {
                            TransferPhase::Assembling
                        } else {
                            TransferPhase::Fetching
                        };
                        Ok(state.phase)
                    }
                },
            }
        };

        match next {
            Err(ProbeError::Fetch(reason)) => {
                warn!(reason = %reason, "probe failed");
                Ok(self.fail(generation, reason))
            }
            Err(ProbeError::Protocol(error)) => {
                warn!(error = %error, "probe response is not a range response");
                self.conclude(generation, TransferPhase::Failed);
                Err(error)
            }
            Ok(phase) => {
                self.publish(generation, EventKind::ChunkProgress);
                if phase == TransferPhase::Assembling {
                    self.finish(generation).await
                } else {
                    self.dispatch(generation, config).await
                }
            }
        }
    }

    /// Resumes a failed transfer.
    ///
    /// Units that exhausted their budget get a fresh one; units that already
    /// succeeded are not fetched again. When the failure happened during the
    /// probe there is nothing to resume and a fresh `download()` is started.
    /// Returns [`TransferOutcome::Busy`] while a transfer runs and
    /// [`TransferOutcome::NothingToRetry`] unless the last transfer failed.
    ///
    /// # Errors
    ///
    /// Same as [`TransferController::download`].
    #[instrument(skip(self))]
    pub async fn retry(&self) -> Result<TransferOutcome, TransferError> {
        let resume = {
            let mut state = self.lock_state();
            if state.phase.is_running() {
                return Ok(TransferOutcome::Busy);
            }
            if state.phase != TransferPhase::Failed {
                debug!(phase = ?state.phase, "retry() ignored, last transfer did not fail");
                return Ok(TransferOutcome::NothingToRetry);
            }
            match (state.config.clone(), state.meta.is_some()) {
                (Some(config), true) => {
                    let scheduler =
                        Scheduler::new(config.max_parallel, config.max_chunk_auto_retry);
                    let reset = scheduler.reset_exhausted(&mut state.units);
                    state.generation += 1;
                    state.phase = TransferPhase::Fetching;
                    state.halt = CancellationToken::new();
                    Some((state.generation, config, reset))
                }
                _ => None,
            }
        };

        let Some((generation, config, reset)) = resume else {
            info!("probe never succeeded, restarting transfer");
            return self.download().await;
        };
        let _abandon = AbandonGuard::new(&self.state, generation);
        info!(generation, reset, "resuming failed transfer");
        self.publish(generation, EventKind::ChunkProgress);
        self.dispatch(generation, config).await
    }

    /// Stops the running transfer.
    ///
    /// If a transfer is running, cancels every in-flight attempt, clears the
    /// artifact name and content type, and emits one `terminate` event.
    /// Returns whether a transfer was running; otherwise nothing changes.
    /// A save already handed to the sink is discarded once it completes.
    pub fn terminate(&self) -> bool {
        let event = {
            let mut state = self.lock_state();
            if !state.phase.is_running() {
                return false;
            }
            if let Some(meta) = state.meta.as_mut() {
                meta.file_name.clear();
                meta.content_type = None;
            }
            let cancelled = Scheduler::cancel_in_flight(&mut state.units);
            state.phase = TransferPhase::Terminated;
            state.halt.cancel();
            info!(generation = state.generation, cancelled, "transfer terminated");
            state.event(EventKind::Terminate)
        };
        self.events.emit(&event);
        true
    }

    async fn dispatch(
        &self,
        generation: u64,
        config: Arc<TransferConfig>,
    ) -> Result<TransferOutcome, TransferError> {
        let scheduler = Scheduler::new(config.max_parallel, config.max_chunk_auto_retry);
        let halt = self.lock_state().halt.clone();
        let mut tasks: JoinSet<Completion> = JoinSet::new();

        loop {
            let (step, integrity_tag) = {
                let mut state = self.lock_state();
                if !state.is_current(generation) || state.phase != TransferPhase::Fetching {
                    return Ok(TransferOutcome::Terminated);
                }
                let tag = state.meta.as_ref().and_then(|m| m.integrity_tag.clone());
                (scheduler.step(&mut state.units), tag)
            };

            match step {
                Step::Launch(launches) => {
                    for launch in launches {
                        let request = config.chunk_request(
                            launch.index,
                            launch.attempt,
                            launch.range,
                            integrity_tag.as_deref(),
                        );
                        let fetcher = Arc::clone(&self.fetcher);
                        let token = launch.token;
                        tasks.spawn(async move {
                            let result = AssertUnwindSafe(fetcher.fetch(&request, token))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    Err(FetchFailure::Network {
                                        range: request.range,
                                        reason: "fetch task panicked".to_string(),
                                    })
                                });
                            Completion {
                                index: request.index,
                                attempt: request.attempt,
                                result,
                            }
                        });
                    }
                }
                Step::Wait => {}
                Step::Exhausted {
                    index,
                    reason,
                    cancelled,
                } => {
                    debug!(index, cancelled, "stopping sibling fetches");
                    tasks.shutdown().await;
                    return Ok(self.fail(generation, format!("chunk {index}: {reason}")));
                }
                Step::Finished(RoundOutcome::Succeeded) => {
                    {
                        let mut state = self.lock_state();
                        if !state.is_current(generation) || state.phase != TransferPhase::Fetching
                        {
                            return Ok(TransferOutcome::Terminated);
                        }
                        state.phase = TransferPhase::Assembling;
                    }
                    return self.finish(generation).await;
                }
                Step::Finished(RoundOutcome::Failed) => {
                    return Ok(self.fail(generation, "chunks left unfinished".to_string()));
                }
            }

            let joined = tokio::select! {
                biased;
                () = halt.cancelled() => {
                    tasks.shutdown().await;
                    return Ok(TransferOutcome::Terminated);
                }
                joined = tasks.join_next() => joined,
            };

            let completion = match joined {
                Some(Ok(completion)) => completion,
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "fetch task aborted");
                    continue;
                }
                None => {
                    // Units marked in flight without a task; fail them so they retry.
                    let mut state = self.lock_state();
                    if state.is_current(generation) {
                        Scheduler::cancel_in_flight(&mut state.units);
                    }
                    continue;
                }
            };

            let applied = {
                let mut state = self.lock_state();
                if !state.is_current(generation) || state.phase != TransferPhase::Fetching {
                    return Ok(TransferOutcome::Terminated);
                }
                scheduler.complete(&mut state.units, completion)
            };
            if applied {
                self.publish(generation, EventKind::ChunkProgress);
            }
        }
    }

    async fn finish(&self, generation: u64) -> Result<TransferOutcome, TransferError> {
        let artifact = {
            let state = self.lock_state();
            if !state.is_current(generation) || state.phase != TransferPhase::Assembling {
                return Ok(TransferOutcome::Terminated);
            }
            let Some(meta) = state.meta.as_ref() else {
                return Err(TransferError::protocol("resource metadata missing at assembly"));
            };
            let capacity = state
                .units
                .iter()
                .filter_map(|u| u.payload().map(bytes::Bytes::len))
                .sum();
            let mut bytes = BytesMut::with_capacity(capacity);
            for unit in &state.units {
                if let Some(payload) = unit.payload() {
                    bytes.extend_from_slice(payload);
                }
            }
            Artifact {
                file_name: meta.file_name.clone(),
                content_type: meta.content_type.clone(),
                integrity_tag: meta.integrity_tag.clone(),
                bytes: bytes.freeze(),
            }
        };
        debug!(bytes = artifact.len(), file_name = %artifact.file_name, "artifact assembled");

        let saved_to = match &self.sink {
            Some(sink) => match sink.persist(&artifact).await {
                Ok(path) => path,
                Err(source) => {
                    warn!(file_name = %artifact.file_name, error = %source, "failed to persist artifact");
                    self.conclude(generation, TransferPhase::Failed);
                    return Err(TransferError::persist(artifact.file_name, source));
                }
            },
            None => None,
        };

        if self.conclude(generation, TransferPhase::Succeeded) {
            info!(file_name = %artifact.file_name, bytes = artifact.len(), "transfer succeeded");
            return Ok(TransferOutcome::Succeeded { artifact, saved_to });
        }

        // Terminated while the sink was writing: the save must not outlive it.
        if let (Some(sink), Some(path)) = (&self.sink, saved_to.as_deref()) {
            info!(path = %path.display(), "discarding artifact saved after terminate");
            if let Err(error) = sink.discard(path).await {
                warn!(path = %path.display(), error = %error, "failed to discard artifact");
            }
        }
        Ok(TransferOutcome::Terminated)
    }

    fn fail(&self, generation: u64, reason: String) -> TransferOutcome {
        if self.conclude(generation, TransferPhase::Failed) {
            warn!(reason = %reason, "transfer failed");
            TransferOutcome::Failed { reason }
        } else {
            TransferOutcome::Terminated
        }
    }

    /// Moves a running transfer into `phase` and emits its terminal event.
    /// Returns false if the transfer was already concluded or replaced.
    fn conclude(&self, generation: u64, phase: TransferPhase) -> bool {
        let Some(kind) = phase.terminal_event() else {
            return false;
        };
        let event = {
            let mut state = self.lock_state();
            if !state.is_current(generation) || !state.phase.is_running() {
                return false;
            }
            state.phase = phase;
            state.event(kind)
        };
        self.events.emit(&event);
        true
    }

    fn publish(&self, generation: u64, kind: EventKind) {
        let event = {
            let state = self.lock_state();
            if !state.is_current(generation) {
                return;
            }
            state.event(kind)
        };
        self.events.emit(&event);
    }

    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TransferController {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.halt.cancel();
        Scheduler::cancel_in_flight(&mut state.units);
    }
}

enum ProbeError {
    Fetch(String),
    Protocol(TransferError),
}

/// Stops a transfer whose `download()`/`retry()` future was dropped mid-way,
/// so the controller does not stay busy forever. Emits nothing.
struct AbandonGuard<'a> {
    state: &'a Mutex<TransferState>,
    generation: u64,
}

impl<'a> AbandonGuard<'a> {
    fn new(state: &'a Mutex<TransferState>, generation: u64) -> Self {
        Self { state, generation }
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_current(self.generation) && state.phase.is_running() {
            debug!(generation = self.generation, "transfer future dropped while running");
            state.phase = TransferPhase::Terminated;
            state.halt.cancel();
            Scheduler::cancel_in_flight(&mut state.units);
        }
    }
}
