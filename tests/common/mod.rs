#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use coach_relay::analytics::{AnalyticsEvent, AnalyticsSink};
use coach_relay::{app, AppConfig, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

pub const SAMPLE_RATE_VAR: &str = "ANALYTICS_SAMPLE_RATE";

/// Pins `ANALYTICS_SAMPLE_RATE` for one test and puts the previous value
/// back on drop.  Hold the env mutex for as long as the guard lives.
pub struct SampleRateGuard {
    previous: Option<String>,
}

impl SampleRateGuard {
    /// Start from an unset rate, i.e. every event is kept.
    pub fn unset() -> Self {
        let guard = Self {
            previous: std::env::var(SAMPLE_RATE_VAR).ok(),
        };
        std::env::remove_var(SAMPLE_RATE_VAR);
        guard
    }

    pub fn pinned(rate: &str) -> Self {
        let guard = Self::unset();
        guard.set(rate);
        guard
    }

    /// Change the rate mid-test; the live process re-reads it per request.
    pub fn set(&self, rate: &str) {
        std::env::set_var(SAMPLE_RATE_VAR, rate);
    }
}

impl Drop for SampleRateGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => std::env::set_var(SAMPLE_RATE_VAR, value),
            None => std::env::remove_var(SAMPLE_RATE_VAR),
        }
    }
}

/// Sink that keeps every event in memory so tests can count them.
#[derive(Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<AnalyticsEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_name == name)
            .collect()
    }
}

#[async_trait::async_trait]
impl AnalyticsSink for RecordingSink {
    fn mode(&self) -> &'static str {
        "memory"
    }

    async fn record(&self, event: &AnalyticsEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn test_config(api_key: Option<&str>, base_url: &str) -> AppConfig {
    AppConfig {
        openai_api_key: api_key.map(str::to_string),
        openai_base_url: base_url.to_string(),
        allowed_origins: ["https://coach.example".to_string()].into_iter().collect(),
        ..AppConfig::default()
    }
}

/// Router wired to a recording sink.
pub fn test_app(config: AppConfig) -> (Router, RecordingSink) {
    let sink = RecordingSink::default();
    let state = AppState::new(config, Arc::new(sink.clone())).unwrap();
    (app(state), sink)
}

/// Requests the mock upstream has received, with their authorization header.
#[derive(Default, Clone)]
pub struct UpstreamLog {
    pub bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    pub auth: Arc<Mutex<Vec<Option<String>>>>,
}

impl UpstreamLog {
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct MockUpstream {
    status: StatusCode,
    body: String,
    delay: Duration,
    log: UpstreamLog,
}

/// Spin up a fake completions API answering every call with `status` and
/// `body`.  Returns its base URL (`/v1` included).
pub async fn start_mock_upstream(status: u16, body: &str) -> (String, UpstreamLog, JoinHandle<()>) {
    start_slow_mock_upstream(status, body, Duration::ZERO).await
}

/// Same as [`start_mock_upstream`] but every answer waits `delay` first.
pub async fn start_slow_mock_upstream(
    status: u16,
    body: &str,
    delay: Duration,
) -> (String, UpstreamLog, JoinHandle<()>) {
    async fn completions(
        State(mock): State<MockUpstream>,
        headers: axum::http::HeaderMap,
        Json(v): Json<serde_json::Value>,
    ) -> (StatusCode, String) {
        mock.log.bodies.lock().unwrap().push(v);
        mock.log.auth.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        );
        if !mock.delay.is_zero() {
            tokio::time::sleep(mock.delay).await;
        }
        (mock.status, mock.body.clone())
    }

    let log = UpstreamLog::default();
    let mock = MockUpstream {
        status: StatusCode::from_u16(status).unwrap(),
        body: body.to_string(),
        delay,
        log: log.clone(),
    };
    let router = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/v1", addr), log, handle)
}

/// Shared buffer the test subscriber writes formatted records into.
#[derive(Default, Clone)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route `INFO` and above on the current thread into a buffer until the
/// returned guard is dropped.  Pair with the default current-thread
/// `#[tokio::test]` runtime so spawned work stays on this thread.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

pub async fn read_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
