//! Progress and lifecycle events.
//!
//! The controller never renders anything; it publishes [`ProgressEvent`]s to
//! an [`EventBus`] and consumers (a progress bar, a dialog, a test) attach
//! listeners per [`EventKind`]. Every subscription returns a
//! [`Subscription`] handle that detaches the listener when dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;

/// Kind of event published by a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// All chunks fetched and the artifact assembled.
    DownloadSuccess,
    /// Probe or budget failure; the transfer stopped.
    DownloadFail,
    /// The transfer was cancelled by the user.
    Terminate,
    /// A chunk completed (or the transfer started).
    ChunkProgress,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DownloadSuccess => "download-success",
            Self::DownloadFail => "download-fail",
            Self::Terminate => "terminate",
            Self::ChunkProgress => "chunk-progress",
        }
    }

    /// True for the kinds that end a transfer.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::ChunkProgress)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a transfer delivered with every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Which event this is.
    pub status: EventKind,
    /// Number of planned chunks.
    pub total_chunks: usize,
    /// Number of chunks fetched successfully.
    pub success_chunks: usize,
    /// Display percentage: `"100"` or two decimals.
    pub percent: String,
    /// Numeric percentage.
    pub percent_num: f64,
    /// Artifact filename, empty until the probe succeeded.
    pub file_name: String,
    /// Total artifact size, zero until the probe succeeded.
    pub file_total_bytes: u64,
}

/// Percentage of succeeded chunks rounded to two decimals, never below `floor`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_percent(success_chunks: usize, total_chunks: usize, floor: f64) -> f64 {
    let percent = if total_chunks == 0 {
        0.0
    } else {
        (success_chunks as f64 / total_chunks as f64 * 10_000.0).round() / 100.0
    };
    percent.max(floor)
}

/// Renders a percentage: exactly 100 becomes `"100"`, anything else two decimals.
#[must_use]
pub fn format_percent(percent: f64) -> String {
    if (percent - 100.0).abs() < f64::EPSILON {
        "100".to_string()
    } else {
        format!("{percent:.2}")
    }
}

type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Publish/subscribe registry keyed by event kind.
///
/// Cloning the bus shares the registry. Listeners run on the task that
/// publishes, in subscription order, outside the registry lock.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let counts: HashMap<EventKind, usize> = registry
            .listeners
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `listener` to `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Number of listeners attached to `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every listener of its kind.
    pub fn emit(&self, event: &ProgressEvent) {
        let listeners: Vec<Listener> = self
            .lock()
            .listeners
            .get(&event.status)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to an attached listener; dropping it detaches the listener.
#[must_use = "dropping a Subscription detaches the listener immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Detaches the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = registry.listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}
