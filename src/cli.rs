//! CLI argument definitions using clap derive macros.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use chunkdl_core::DownloadOptions;
use chunkdl_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Download a large file as parallel, individually retried HTTP range requests.
///
/// Every option can also come from a JSON `--options` file using the
/// camelCase option names (`url`, `data`, `headers`, `chunkSizeByte`,
/// `maxParallel`, `maxChunkAutoRetry`, `firstChunkProgress`, `method`).
/// Flags given on the command line win over the file.
#[derive(Parser, Debug)]
#[command(name = "chunkdl")]
#[command(author, version, about)]
pub struct Args {
    /// Download endpoint
    pub url: Option<String>,

    /// Directory the finished file is written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// JSON options file (camelCase keys)
    #[arg(long, value_name = "FILE")]
    pub options: Option<PathBuf>,

    /// Chunk size in bytes [default: 3145728]
    #[arg(short = 's', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: Option<u64>,

    /// Maximum range requests in flight (1-100) [default: 10]
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub max_parallel: Option<u16>,

    /// Automatic retries per chunk [default: 3]
    #[arg(short = 'r', long)]
    pub max_retries: Option<u32>,

    /// Progress floor in percent reported until real progress passes it [default: 10]
    #[arg(long, value_name = "PERCENT")]
    pub first_chunk_progress: Option<f64>,

    /// HTTP method for range requests [default: POST]
    #[arg(short = 'X', long)]
    pub method: Option<String>,

    /// Extra request header, `name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// JSON object sent as the request body template
    #[arg(short, long, value_name = "JSON")]
    pub data: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = READ_TIMEOUT_SECS)]
    pub read_timeout: u64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Options given as flags; unset flags stay `None` so a file can fill them.
    pub fn option_overrides(&self) -> Result<DownloadOptions> {
        let headers = if self.headers.is_empty() {
            None
        } else {
            let mut parsed = BTreeMap::new();
            for raw in &self.headers {
                let (name, value) = parse_header(raw)?;
                parsed.insert(name, value);
            }
            Some(parsed)
        };

        let data = match &self.data {
            None => None,
            Some(raw) => match serde_json::from_str(raw).context("--data is not valid JSON")? {
                serde_json::Value::Object(map) => Some(map),
                _ => bail!("--data must be a JSON object"),
            },
        };

        Ok(DownloadOptions {
            url: self.url.clone(),
            data,
            headers,
            chunk_size_byte: self.chunk_size,
            max_parallel: self.max_parallel.map(usize::from),
            max_chunk_auto_retry: self.max_retries,
            first_chunk_progress: self.first_chunk_progress,
            method: self.method.clone(),
        })
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header `{raw}` must look like `name: value`");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header `{raw}` has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
