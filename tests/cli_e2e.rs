//! End-to-end CLI tests for the chunkdl binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod support;
use support::range_server::{DOWNLOAD_PATH, RangeResponder, sample_content, start_range_server};

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("chunkdl").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP range requests"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("chunkdl").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chunkdl"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("chunkdl").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Without a URL (flag or options file) there is nothing to download.
#[test]
fn test_binary_without_url_reports_missing_option() {
    let mut cmd = Command::cargo_bin("chunkdl").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("url"));
}

#[test]
fn test_binary_rejects_unreadable_options_file() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("chunkdl").unwrap();
    cmd.arg("--options")
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("options file"));
}

#[tokio::test]
async fn test_binary_downloads_file_into_output_dir() {
    let Some(server) = start_range_server().await else {
        return;
    };
    let content = sample_content(5000);
    RangeResponder::new(content.clone()).mount(&server).await;

    let out = TempDir::new().unwrap();
    let url = format!("{}{DOWNLOAD_PATH}", server.uri());
    let out_path = out.path().to_path_buf();

    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("chunkdl")
            .unwrap()
            .arg(url)
            .arg("-o")
            .arg(&out_path)
            .args(["-s", "1024", "-p", "3", "-q"])
            .assert()
    })
    .await
    .unwrap();
    assert.success();

    let saved = std::fs::read(out.path().join("报表.xlsx")).unwrap();
    assert_eq!(saved, content);
}

#[tokio::test]
async fn test_binary_reads_options_file_and_flags_override_it() {
    let Some(server) = start_range_server().await else {
        return;
    };
    RangeResponder::new(sample_content(3000)).mount(&server).await;

    let dir = TempDir::new().unwrap();
    let options_path = dir.path().join("options.json");
    let options = serde_json::json!({
        "url": format!("{}{DOWNLOAD_PATH}", server.uri()),
        "chunkSizeByte": 0,
        "maxParallel": 2,
        "data": {"fileId": 9}
    });
    std::fs::write(&options_path, options.to_string()).unwrap();
    let out_path = dir.path().join("out");

    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("chunkdl")
            .unwrap()
            .arg("--options")
            .arg(&options_path)
            .args(["--chunk-size", "1000", "-q", "-o"])
            .arg(&out_path)
            .assert()
    })
    .await
    .unwrap();
    assert.success();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3, "3000 bytes: probe 0-1000, then 1001-2000, 2001-2999");
}
