//! User-Agent string for range requests.

/// Tool identifier appended to the User-Agent.
const TOOL_TAG: &str = "chunked-range-downloader";

/// Default User-Agent for range requests (identifies the tool and version).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("chunkdl/{version} ({TOOL_TAG})")
}
