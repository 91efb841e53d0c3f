use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{AnalyticsEvent, AnalyticsSink};
use crate::config::DatabaseConfig;

const CREATE_EVENTS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS events (
        id BIGSERIAL PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL DEFAULT now(),
        session_id TEXT,
        user_agent TEXT,
        ip TEXT,
        page TEXT,
        step INTEGER,
        section_id TEXT,
        event_name TEXT NOT NULL,
        payload JSONB
    )
";

const INSERT_EVENT: &str = r"
    INSERT INTO events (session_id, user_agent, ip, page, step, section_id, event_name, payload)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

/// Persisted backend: one row in `events` per recorded event.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Open the pool and make sure the `events` table exists.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_mode = if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };
        let options: PgConnectOptions = config
            .url
            .parse::<PgConnectOptions>()
            .context("DATABASE_URL is not a valid Postgres connection string")?
            .ssl_mode(ssl_mode);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to analytics database")?;
        let sink = Self { pool };
        sink.migrate().await?;
        tracing::info!(
            max_connections = config.max_connections,
            ssl = config.ssl,
            "analytics persisted to postgres"
        );
        Ok(sink)
    }

    /// Wrap an existing pool.  The table is still created if missing.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let sink = Self { pool };
        sink.migrate().await?;
        Ok(sink)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_EVENTS_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create events table")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl AnalyticsSink for PostgresSink {
    fn mode(&self) -> &'static str {
        "postgres"
    }

    async fn record(&self, event: &AnalyticsEvent) -> Result<()> {
        sqlx::query(INSERT_EVENT)
            .bind(event.session_id.as_deref())
            .bind(event.user_agent.as_deref())
            .bind(event.ip.as_deref())
            .bind(event.page.as_deref())
            .bind(event.step)
            .bind(event.section_id.as_deref())
            .bind(event.event_name.as_str())
            .bind(event.payload.clone().map(Json))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert analytics event '{}'", event.event_name))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("analytics database pool closed");
    }
}
