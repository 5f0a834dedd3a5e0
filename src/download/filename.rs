//! Filename extraction, sanitization, and path resolution for artifacts.
//!
//! The probe response names the artifact through Content-Disposition; this
//! module turns that header into a decoded name and, when the artifact is
//! saved to disk, into a safe, collision-free path.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Guess file extension from Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "text/html" => ".html",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-excel" => ".xls",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "video/mp4" => ".mp4",
        "audio/mpeg" => ".mp3",
        _ => ".bin", // Fallback for unknown types
    }
}

/// Parses Content-Disposition header to extract a percent-decoded filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=%E6%8A%A5%E8%A1%A8.xlsx`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let name = percent_decode(encoded[..end].trim());
            if !name.is_empty() {
                return Some(name);
            }
        }
    }

    let lower = header.to_ascii_lowercase();
    let pos = lower.find("filename=")?;
    let value = header[pos + 9..].trim();

    let raw = if let Some(stripped) = value.strip_prefix('"') {
        &stripped[..stripped.find('"')?]
    } else {
        let end = value.find(';').unwrap_or(value.len());
        value[..end].trim()
    };

    let name = percent_decode(raw);
    (!name.is_empty()).then_some(name)
}

/// Percent-decodes a header value, keeping the raw text when it is not valid UTF-8.
fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), std::borrow::Cow::into_owned)
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            // Also handle null and control characters
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a unique file path, adding numeric suffix if file exists.
///
/// `file.pdf`, then `file_1.pdf`, `file_2.pdf`, ...
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "download.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);

    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let new_path = dir.join(format!("{stem}_{i}{ext}"));
        if !new_path.exists() {
            return new_path;
        }
    }

    // Fallback (extremely unlikely)
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Fallback filename derived from the URL's last path segment.
pub(crate) fn fallback_filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    Some(sanitize_filename(&percent_decode(last)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_parse_content_disposition_quoted() {
        let header = r#"attachment; filename="example.pdf""#;
        assert_eq!(
            parse_content_disposition(header),
            Some("example.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_percent_encoded() {
        let header = "attachment; filename=%E6%8A%A5%E8%A1%A8.xlsx";
        assert_eq!(
            parse_content_disposition(header),
            Some("报表.xlsx".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_case_insensitive_key() {
        let header = "attachment; FileName=data.csv; size=10";
        assert_eq!(
            parse_content_disposition(header),
            Some("data.csv".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_rfc5987() {
        let header = "attachment; filename*=UTF-8''my%20file.pdf";
        assert_eq!(
            parse_content_disposition(header),
            Some("my file.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_missing() {
        assert_eq!(parse_content_disposition("inline"), None);
        assert_eq!(parse_content_disposition("attachment; filename="), None);
    }

    #[test]
    fn test_resolve_unique_path_with_conflict() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("test.pdf"), b"existing").unwrap();

        let path = resolve_unique_path(temp_dir.path(), "test.pdf");
        assert_eq!(path, temp_dir.path().join("test_1.pdf"));
    }

    #[test]
    fn test_resolve_unique_path_protects_against_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let path = resolve_unique_path(temp_dir.path(), "../../etc/passwd");
        assert!(path.starts_with(temp_dir.path()));
        assert_eq!(path.parent(), Some(temp_dir.path()));
    }

    #[test]
    fn test_extension_from_content_type_strips_parameters() {
        assert_eq!(
            extension_from_content_type("application/pdf; charset=binary"),
            ".pdf"
        );
        assert_eq!(extension_from_content_type("application/x-unknown"), ".bin");
    }

    #[test]
    fn test_fallback_filename_from_url_uses_last_path_segment() {
        assert_eq!(
            fallback_filename_from_url("https://example.com/api/export/report%20q3.csv"),
            Some("report q3.csv".to_string())
        );
        assert_eq!(fallback_filename_from_url("https://example.com/"), None);
    }
}
