//! Error taxonomy for the HTTP surface.
//!
//! Every handler returns `Result<_, ApiError>`.  Client input problems and
//! upstream failures carry their message to the caller; internal failures
//! are logged in full here and reach the caller only as a fixed string.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("Missing {0}")]
    MissingCredential(&'static str),
    #[error("upstream responded with status {status}")]
    Upstream { status: u16, body: String },
    #[error("proxy failure: {0:#}")]
    Proxy(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::MissingCredential(_) | ApiError::Proxy(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::PayloadTooLarge(msg) => msg.clone(),
            ApiError::MissingCredential(_) => self.to_string(),
            ApiError::Upstream { body, .. } => body.clone(),
            ApiError::Proxy(_) => "Proxy error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Proxy(err) => {
                tracing::error!(error = ?err, "request failed");
            }
            ApiError::MissingCredential(name) => {
                tracing::error!(credential = %name, "upstream credential not configured");
            }
            ApiError::PayloadTooLarge(msg) => {
                tracing::warn!(message = %msg, "request body exceeded configured limit");
            }
            ApiError::BadRequest(_) | ApiError::Upstream { .. } => {}
        }
        let body = ErrorResponse {
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
