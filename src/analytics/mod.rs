//! Analytics recording.
//!
//! Each sink encapsulates one storage backend.  The mode is picked once at
//! startup: `PostgresSink` when a database is configured, `LogOnlySink`
//! otherwise.  Handlers only ever talk to the `Analytics` recorder, which
//! bounds each write in time and never surfaces sink failures.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::util::{truncate_chars, RequestMeta};

pub mod log_only;
pub mod postgres;

pub use self::log_only::LogOnlySink;
pub use self::postgres::PostgresSink;

pub const MAX_EVENT_NAME_CHARS: usize = 64;

/// One analytics record.  Written once, never updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub page: Option<String>,
    pub step: Option<i32>,
    pub section_id: Option<String>,
    pub event_name: String,
    pub payload: Option<serde_json::Value>,
}

impl AnalyticsEvent {
    /// Create an event with its name clipped to 64 characters.
    pub fn named(event_name: &str) -> Self {
        Self {
            event_name: truncate_chars(event_name, MAX_EVENT_NAME_CHARS),
            ..Self::default()
        }
    }

    /// Copy caller details onto the event.
    pub fn with_meta(mut self, meta: &RequestMeta) -> Self {
        self.session_id = meta.session_id.clone();
        self.user_agent = meta.user_agent.clone();
        self.ip = meta.ip.clone();
        self.page = meta.page.clone();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Trait implemented by every storage backend.
#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Short backend name exposed on the health endpoint.
    fn mode(&self) -> &'static str;

    async fn record(&self, event: &AnalyticsEvent) -> anyhow::Result<()>;

    /// Release backend resources on shutdown.
    async fn close(&self) {}
}

/// Handle shared by all handlers.
#[derive(Clone)]
pub struct Analytics {
    sink: Arc<dyn AnalyticsSink>,
    timeout: Duration,
}

impl Analytics {
    pub fn new(sink: Arc<dyn AnalyticsSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Select the backend from configuration.  Fails only when a database is
    /// configured but cannot be reached or prepared.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let sink: Arc<dyn AnalyticsSink> = match &config.database {
            Some(db) => Arc::new(PostgresSink::connect(db).await?),
            None => {
                tracing::warn!("DATABASE_URL not set; analytics events will only be logged");
                Arc::new(LogOnlySink)
            }
        };
        Ok(Self::new(
            sink,
            Duration::from_millis(config.analytics_timeout_ms),
        ))
    }

    pub fn mode(&self) -> &'static str {
        self.sink.mode()
    }

    /// Record an event.  Waits for the sink up to the configured timeout;
    /// failures are logged and swallowed.
    pub async fn record(&self, event: AnalyticsEvent) {
        match tokio::time::timeout(self.timeout, self.sink.record(&event)).await {
            Ok(Ok(())) => {
                tracing::debug!(event_name = %event.event_name, mode = self.sink.mode(), "analytics event recorded");
            }
            Ok(Err(err)) => {
                tracing::warn!(event_name = %event.event_name, error = ?err, "failed to record analytics event");
            }
            Err(_) => {
                tracing::warn!(
                    event_name = %event.event_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "analytics write timed out"
                );
            }
        }
    }

    pub async fn close(&self) {
        self.sink.close().await;
    }
}
