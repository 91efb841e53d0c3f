//! Utility helpers for the relay.
//!
//! Header extraction shared by the chat and tracking handlers, plus
//! character-based truncation used when clipping analytics fields.  These
//! helpers are deliberately small and free of request state.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Return a header value as `&str` when present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Same as [`header_str`] but drops empty values and returns an owned copy.
pub fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    header_str(headers, name)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Derive the client IP.  The first comma separated entry of
/// `x-forwarded-for` wins; otherwise the peer address of the connection is
/// used when the server was started with connect info.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => peer.map(|addr| addr.ip().to_string()),
    }
}

/// Caller details attached to every analytics event raised by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub page: Option<String>,
}

impl RequestMeta {
    /// Session from `x-session-id`, page from `referer`.
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self {
            session_id: header_string(headers, "x-session-id"),
            user_agent: header_string(headers, "user-agent"),
            ip: client_ip(headers, peer),
            page: header_string(headers, "referer"),
        }
    }
}

/// Keep at most `max` characters of `s` (not bytes, so multi-byte text is
/// never split mid-codepoint).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Length in characters, used for the `*_len` analytics fields.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}
