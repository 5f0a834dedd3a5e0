//! Terminal progress bar fed by transfer events.

use indicatif::{ProgressBar, ProgressStyle};

use chunkdl_core::download::Subscription;
use chunkdl_core::{EventKind, ProgressEvent, TransferController};

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Progress bar kept in sync with a controller's events.
///
/// Dropping it detaches the listeners and clears the bar.
pub(crate) struct ProgressDisplay {
    bar: ProgressBar,
    _subscriptions: Vec<Subscription>,
}

impl ProgressDisplay {
    pub(crate) fn attach(controller: &TransferController) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let subscriptions = [
            EventKind::ChunkProgress,
            EventKind::DownloadSuccess,
            EventKind::DownloadFail,
            EventKind::Terminate,
        ]
        .into_iter()
        .map(|kind| {
            let bar = bar.clone();
            controller
                .events()
                .subscribe(kind, move |event| render(&bar, event))
        })
        .collect();

        Self {
            bar,
            _subscriptions: subscriptions,
        }
    }
}

impl Drop for ProgressDisplay {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn render(bar: &ProgressBar, event: &ProgressEvent) {
    bar.set_position(event.percent_num.clamp(0.0, 100.0).round() as u64);
    if event.status.is_terminal() {
        bar.abandon_with_message(message(event));
    } else {
        bar.set_message(message(event));
    }
}

fn message(event: &ProgressEvent) -> String {
    let name = if event.file_name.is_empty() {
        "resolving"
    } else {
        event.file_name.as_str()
    };
    match event.status {
        EventKind::ChunkProgress => format!(
            "{}% {name} ({}/{} chunks)",
            event.percent, event.success_chunks, event.total_chunks
        ),
        EventKind::DownloadSuccess => format!("{name} done"),
        EventKind::DownloadFail => format!("{name} failed"),
        EventKind::Terminate => "cancelled".to_string(),
    }
}
