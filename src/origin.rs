//! Origin allow-list enforcement.
//!
//! Browsers send an `Origin` header on cross-site requests; server-side
//! tools usually do not.  Requests without the header are let through,
//! requests from an origin outside the list are refused before routing.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    Allow,
    Deny,
}

/// Exact-match origin allow-list.  Built once at startup.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    allowed: Arc<HashSet<String>>,
}

impl OriginGuard {
    pub fn new(allowed: HashSet<String>) -> Self {
        Self {
            allowed: Arc::new(allowed),
        }
    }

    pub fn check(&self, origin: Option<&str>) -> OriginDecision {
        match origin {
            None => OriginDecision::Allow,
            Some(o) if self.allowed.contains(o) => OriginDecision::Allow,
            Some(_) => OriginDecision::Deny,
        }
    }

    /// Response headers for allowed origins (preflight included).
    pub fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static("x-session-id"),
            ])
    }
}

pub async fn origin_guard_middleware(
    State(guard): State<OriginGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // A header that is not valid UTF-8 cannot match the list.
    let origin = match req.headers().get(header::ORIGIN) {
        Some(value) => match value.to_str() {
            Ok(s) => Some(s),
            Err(_) => {
                tracing::warn!("rejecting request with non UTF-8 Origin header");
                return (StatusCode::FORBIDDEN, "Not allowed by CORS").into_response();
            }
        },
        None => None,
    };
    match guard.check(origin) {
        OriginDecision::Allow => next.run(req).await,
        OriginDecision::Deny => {
            tracing::warn!(origin = ?origin, "origin not in allow-list");
            (StatusCode::FORBIDDEN, "Not allowed by CORS").into_response()
        }
    }
}
