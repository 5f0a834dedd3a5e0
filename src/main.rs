//! CLI entry point for chunkdl.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chunkdl_core::{
    DirectorySink, DownloadOptions, HttpRangeFetcher, TransferController, TransferOutcome,
};
use clap::Parser;
use tracing::{debug, error, info, warn};

mod cli;
mod progress;

use cli::Args;
use progress::ProgressDisplay;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?args, "CLI arguments parsed");

    let options = load_options(&args).await?;
    let fetcher = HttpRangeFetcher::with_timeouts(args.connect_timeout, args.read_timeout)
        .context("failed to build HTTP client")?;
    let controller = Arc::new(
        TransferController::new(Arc::new(fetcher))
            .with_sink(Arc::new(DirectorySink::new(&args.output_dir))),
    );
    controller
        .update_option(options)
        .context("invalid download options")?;

    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling transfer");
                controller.terminate();
            }
        })
    };

    let display = progress::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        progress::is_dumb_terminal(),
    )
    .then(|| ProgressDisplay::attach(&controller));

    let outcome = controller.download().await;
    drop(display);
    interrupt.abort();

    match outcome.context("download failed")? {
        TransferOutcome::Succeeded { artifact, saved_to } => {
            match saved_to {
                Some(path) => info!(path = %path.display(), bytes = artifact.len(), "download complete"),
                None => info!(file_name = %artifact.file_name, bytes = artifact.len(), "download complete"),
            }
            Ok(ExitCode::SUCCESS)
        }
        TransferOutcome::Failed { reason } => {
            error!(reason = %reason, "download failed");
            Ok(ExitCode::FAILURE)
        }
        TransferOutcome::Terminated => {
            warn!("download cancelled");
            Ok(ExitCode::from(130))
        }
        TransferOutcome::Busy | TransferOutcome::NothingToRetry => Ok(ExitCode::FAILURE),
    }
}

/// Options file (if any) overlaid with the flags given on the command line.
async fn load_options(args: &Args) -> Result<DownloadOptions> {
    let base = match &args.options {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read options file {}", path.display()))?;
            DownloadOptions::from_json_str(&json)
                .with_context(|| format!("invalid options file {}", path.display()))?
        }
        None => DownloadOptions::default(),
    };
    Ok(base.overlay(args.option_overrides()?))
}
