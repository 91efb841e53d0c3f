//! Core library for the coach relay.  This module wires together the
//! origin guard, chat relay and analytics recorder behind the HTTP
//! handlers.

pub mod analytics;
mod config;
pub mod error;
pub mod origin;
pub mod relay;
pub mod sanitize;
pub mod util;

pub use config::{sample_rate_from_env, AppConfig, DatabaseConfig};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::analytics::{Analytics, AnalyticsEvent, AnalyticsSink};
use crate::error::ApiError;
use crate::origin::{origin_guard_middleware, OriginGuard};
use crate::relay::ChatRelay;
use crate::sanitize::ChatRequest;
use crate::util::RequestMeta;

pub use crate::analytics::MAX_EVENT_NAME_CHARS;
pub use crate::sanitize::ChatTurn;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TrackResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
}

/// Validated `/api/track` body.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub event: String,
    pub page: Option<String>,
    pub step: Option<i32>,
    pub section_id: Option<String>,
    pub session_id: Option<String>,
    pub payload: Option<Value>,
}

impl TrackRequest {
    /// `event` must be a non-empty string; every other field degrades to
    /// `None` when it has the wrong shape.
    pub fn from_value(body: &Value) -> Result<Self, ApiError> {
        let event = body
            .get("event")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ApiError::BadRequest("event is required".to_string()))?;

        let step = body
            .get("step")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite())
            .map(|s| s.trunc() as i32);
        let payload = body.get("payload").filter(|p| p.is_object()).cloned();

        Ok(Self {
            event: util::truncate_chars(event, MAX_EVENT_NAME_CHARS),
            page: string_field(body, "page"),
            step,
            section_id: string_field(body, "sectionId"),
            session_id: string_field(body, "sessionId"),
            payload,
        })
    }

    /// Body fields win over the header derived ones.
    pub fn into_event(self, meta: RequestMeta) -> AnalyticsEvent {
        AnalyticsEvent {
            session_id: self.session_id.or(meta.session_id),
            user_agent: meta.user_agent,
            ip: meta.ip,
            page: self.page.or(meta.page),
            step: self.step,
            section_id: self.section_id,
            event_name: self.event,
            payload: self.payload,
        }
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Internal application state shared across handlers.  Everything here is
/// built once at startup and read-only afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub relay: ChatRelay,
    pub analytics: Analytics,
    pub origin_guard: OriginGuard,
}

impl AppState {
    /// Assemble state around an already constructed analytics sink.
    pub fn new(config: AppConfig, sink: Arc<dyn AnalyticsSink>) -> anyhow::Result<Self> {
        let analytics = Analytics::new(sink, Duration::from_millis(config.analytics_timeout_ms));
        Self::with_analytics(config, analytics)
    }

    fn with_analytics(config: AppConfig, analytics: Analytics) -> anyhow::Result<Self> {
        let relay = ChatRelay::new(&config)?;
        let origin_guard = OriginGuard::new(config.allowed_origins.clone());
        Ok(Self {
            config: Arc::new(config),
            relay,
            analytics,
            origin_guard,
        })
    }
}

/// Build state from environment variables.  This function reads the
/// following variables:
///
/// * `OPENAI_API_KEY` / `OPENAI_BASE_URL` – upstream credential and base URL.
/// * `DATABASE_URL` (optional) – enables persisted analytics.
/// * `ALLOWED_ORIGINS` (optional) – comma separated browser origins.
///
/// See `AppConfig::from_env` for the full list.
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    build_state(config).await
}

pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; /api/chat will fail until it is configured");
    }
    let analytics = Analytics::from_config(&config).await?;
    AppState::with_analytics(config, analytics)
}

/// Build the Axum router and attach handlers.  The origin guard wraps
/// every route so refused requests never reach a handler.
pub fn app(state: AppState) -> Router {
    let guard = state.origin_guard.clone();
    let max_request_bytes = state.config.max_request_bytes;

    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/track", post(track_handler))
        .route("/api/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    guard.clone(),
                    origin_guard_middleware,
                ))
                .layer(guard.cors_layer()),
        )
        .with_state(state)
}

fn body_or_bad_request(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(ApiError::PayloadTooLarge("Request too large".to_string()))
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected request body");
            Err(ApiError::BadRequest(rejection.body_text()))
        }
    }
}

async fn root_handler() -> &'static str {
    "coach relay is running"
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let json = serde_json::json!({
        "ok": true,
        "analytics": state.analytics.mode(),
    });
    (StatusCode::OK, Json(json))
}

/// Handler for `/api/track`.  Validates the client event, applies the
/// live sample rate and hands the event to the analytics recorder.
async fn track_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TrackResponse>, ApiError> {
    let body = body_or_bad_request(payload)?;
    let track = TrackRequest::from_value(&body)?;

    let rate = sample_rate_from_env();
    if rate < 1.0 && rand::random::<f64>() >= rate {
        tracing::trace!(event = %track.event, rate, "event dropped by sampling");
        return Ok(Json(TrackResponse {
            ok: true,
            sampled: Some(false),
        }));
    }

    let meta = RequestMeta::from_headers(&headers, peer.map(|ConnectInfo(addr)| addr));
    state.analytics.record(track.into_event(meta)).await;
    Ok(Json(TrackResponse {
        ok: true,
        sampled: None,
    }))
}

/// Handler for `/api/chat`.  The credential is checked before the body is
/// looked at; everything after that is delegated to the relay.
///
/// The relay runs on its own task so a client hanging up mid-request
/// cannot cancel the upstream call or the analytics write that follows it.
async fn chat_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.relay.api_key()?;
    let body = body_or_bad_request(payload)?;
    let req = ChatRequest::from_value(&body);
    let meta = RequestMeta::from_headers(&headers, peer.map(|ConnectInfo(addr)| addr));
    tracing::debug!(model = %req.model, turns = req.messages.len(), "relaying chat request");
    let relay = state.relay.clone();
    let analytics = state.analytics.clone();
    let task = tokio::spawn(async move { relay.relay(&req, &meta, &analytics).await });
    let reply = task.await.map_err(|err| {
        ApiError::Proxy(anyhow::Error::new(err).context("chat relay task failed"))
    })??;
    Ok(Json(ChatResponse { reply }))
}
