//! Mock range server: serves slices of an in-memory file the way the
//! chunked download endpoint does (206 + Content-Range + Content-Disposition
//! + x-file-hash), with per-range failure injection.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DOWNLOAD_PATH: &str = "/api/download/bigFile";
pub const FILE_HASH: &str = "5d41402abc4b2a76";

/// Set to `1` to make sandboxes without loopback sockets fail these tests
/// instead of skipping them.
const REQUIRE_SERVER_ENV: &str = "CHUNKDL_REQUIRE_SOCKET_TESTS";

/// Starts a mock server, or returns `None` (after saying so on stderr) when
/// loopback sockets are unavailable.
pub async fn start_range_server() -> Option<MockServer> {
    if let Err(error) = TcpListener::bind("127.0.0.1:0") {
        let required = std::env::var(REQUIRE_SERVER_ENV).is_ok_and(|v| v == "1");
        assert!(!required, "{REQUIRE_SERVER_ENV}=1 but loopback bind failed: {error}");
        eprintln!("skipping range server test, loopback bind failed: {error}");
        return None;
    }
    Some(MockServer::start().await)
}

/// Deterministic, non-repeating-per-chunk file content.
pub fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Clone, Default)]
pub struct Fault {
    /// Requests starting at this offset fail this many times with 503.
    failures: Arc<Mutex<HashMap<u64, u32>>>,
    /// Requests starting at this offset get a JSON error envelope (HTTP 200).
    envelopes: Arc<Mutex<HashMap<u64, String>>>,
}

impl Fault {
    pub fn fail_times(&self, start: u64, times: u32) {
        self.failures.lock().unwrap().insert(start, times);
    }

    pub fn envelope(&self, start: u64, message: &str) {
        self.envelopes
            .lock()
            .unwrap()
            .insert(start, message.to_string());
    }
}

pub struct RangeResponder {
    content: Arc<Vec<u8>>,
    file_name: &'static str,
    fault: Fault,
    body_delay: Option<Duration>,
    send_content_range: bool,
}

impl RangeResponder {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content: Arc::new(content),
            file_name: "%E6%8A%A5%E8%A1%A8.xlsx",
            fault: Fault::default(),
            body_delay: None,
            send_content_range: true,
        }
    }

    pub fn fault(&self) -> Fault {
        self.fault.clone()
    }

    /// Delays every response except the probe's.
    pub fn with_body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = Some(delay);
        self
    }

    pub fn without_content_range(mut self) -> Self {
        self.send_content_range = false;
        self
    }

    pub async fn mount(self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(self)
            .mount(server)
            .await;
    }
}

pub fn requested_range(request: &Request) -> Option<(u64, u64)> {
    let value = request.headers.get("range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = requested_range(request) else {
            return ResponseTemplate::new(416);
        };

        if let Some(left) = self.fault.failures.lock().unwrap().get_mut(&start)
            && *left > 0
        {
            *left -= 1;
            return ResponseTemplate::new(503).set_body_string("busy");
        }
        if let Some(message) = self.fault.envelopes.lock().unwrap().get(&start) {
            return ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(format!(r#"{{"code":401,"message":"{message}"}}"#));
        }

        let total = self.content.len() as u64;
        let last = end.min(total - 1);
        let body = self.content[start as usize..=last as usize].to_vec();

        let mut response = ResponseTemplate::new(206)
            .insert_header(
                "content-disposition",
                format!("attachment; filename={}", self.file_name).as_str(),
            )
            .insert_header("content-type", "application/octet-stream")
            .insert_header("x-file-hash", FILE_HASH)
            .set_body_bytes(body);
        if self.send_content_range {
            response = response.insert_header(
                "content-range",
                format!("bytes {start}-{last}/{total}").as_str(),
            );
        }
        if start > 0
            && let Some(delay) = self.body_delay
        {
            response = response.set_delay(delay);
        }
        response
    }
}
