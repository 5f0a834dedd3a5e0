//! Artifact delivery.
//!
//! Once every chunk is fetched the controller assembles an [`Artifact`] and
//! hands it to an [`ArtifactSink`]. [`DirectorySink`] writes it into a
//! directory under a collision-free name; embedders that keep artifacts in
//! memory (or trigger a browser-style save) provide their own sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::filename::{extension_from_content_type, resolve_unique_path, sanitize_filename};

/// The assembled payload of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Name suggested by the server (or derived from the URL).
    pub file_name: String,
    /// `content-type` reported by the probe.
    pub content_type: Option<String>,
    /// `x-file-hash` reported by the probe.
    pub integrity_tag: Option<String>,
    /// Every chunk's payload, concatenated in index order.
    pub bytes: Bytes,
}

impl Artifact {
    /// Artifact size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-byte artifact.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Receives finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persists `artifact`, returning where it ended up if that is a path.
    ///
    /// # Errors
    ///
    /// Returns the IO error that prevented persisting the artifact.
    async fn persist(&self, artifact: &Artifact) -> std::io::Result<Option<PathBuf>>;

    /// Removes an artifact `persist` stored at `location` after its transfer
    /// was terminated. Sinks that hand artifacts off irrevocably keep the default.
    ///
    /// # Errors
    ///
    /// Returns the IO error that prevented removing the artifact.
    async fn discard(&self, location: &Path) -> std::io::Result<()> {
        let _ = location;
        Ok(())
    }
}

/// Writes artifacts into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Creates a sink writing into `dir` (created on first use).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn persist(&self, artifact: &Artifact) -> std::io::Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = output_file_name(artifact);
        let path = resolve_unique_path(&self.dir, &name);
        debug!(name = %name, path = %path.display(), "resolved artifact path");

        let result = write_all(&path, &artifact.bytes).await;
        if let Err(error) = result {
            debug!(path = %path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&path).await;
            return Err(error);
        }

        info!(path = %path.display(), bytes = artifact.len(), "artifact saved");
        Ok(Some(path))
    }

    async fn discard(&self, location: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(location).await {
            Err(error) if error.kind() != std::io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}

async fn write_all(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// File name on disk: the sanitized artifact name, with an extension derived
/// from the content type when the name has none.
fn output_file_name(artifact: &Artifact) -> String {
    let name = sanitize_filename(artifact.file_name.trim());
    let has_extension = matches!(name.rfind('.'), Some(pos) if pos > 0 && pos + 1 < name.len());
    if has_extension {
        return name;
    }
    match artifact.content_type.as_deref().map(extension_from_content_type) {
        Some(ext) => format!("{name}{ext}"),
        _ => name,
    }
}
