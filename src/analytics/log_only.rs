use super::{AnalyticsEvent, AnalyticsSink};

/// Fallback backend used when no database is configured: every event
/// becomes one structured log record under the `analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySink;

#[async_trait::async_trait]
impl AnalyticsSink for LogOnlySink {
    fn mode(&self) -> &'static str {
        "log"
    }

    async fn record(&self, event: &AnalyticsEvent) -> anyhow::Result<()> {
        let payload = event
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "null".to_string());
        tracing::info!(
            target: "analytics",
            ts = %chrono::Utc::now().to_rfc3339(),
            event_name = %event.event_name,
            session_id = ?event.session_id,
            user_agent = ?event.user_agent,
            ip = ?event.ip,
            page = ?event.page,
            step = ?event.step,
            section_id = ?event.section_id,
            payload = %payload,
            "analytics event"
        );
        Ok(())
    }
}
