//! Normalisation of client supplied chat input.
//!
//! Browser clients post loosely shaped JSON.  Nothing in here fails: bad
//! elements are dropped and bad scalars fall back to defaults, so the relay
//! only ever forwards well-typed turns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Validated form of a `/api/chat` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f64,
    pub system: String,
    pub messages: Vec<ChatTurn>,
}

impl ChatRequest {
    /// Build a request from an arbitrary JSON body.  A body that is not an
    /// object is read as `{}`.
    pub fn from_value(body: &Value) -> Self {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        let system = body
            .get("system")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let temperature = coerce_temperature(body.get("temperature"));
        let messages = sanitize_messages(body.get("messages"), &system);
        Self {
            model,
            temperature,
            system,
            messages,
        }
    }

    /// Content of the most recent user turn, or "" when there is none.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|turn| turn.role == "user")
            .map(|turn| turn.content.as_str())
            .unwrap_or("")
    }
}

/// Turn an untrusted `messages` value into clean turns.
///
/// Non-arrays become empty, elements without a string `role` and string
/// `content` are dropped, and a non-empty `system` prompt is prepended
/// unless a system turn already exists.
pub fn sanitize_messages(raw: Option<&Value>, system: &str) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = match raw {
        Some(Value::Array(items)) => items.iter().filter_map(turn_from_value).collect(),
        _ => Vec::new(),
    };

    if !system.is_empty() && !turns.iter().any(|t| t.role == "system") {
        turns.insert(0, ChatTurn::new("system", system));
    }
    turns
}

fn turn_from_value(item: &Value) -> Option<ChatTurn> {
    let obj = item.as_object()?;
    let role = obj.get("role")?.as_str()?;
    let content = obj.get("content")?.as_str()?;
    Some(ChatTurn::new(role, content))
}

/// Numeric coercion for `temperature`.  Numbers pass through, numeric
/// strings are parsed (blank means 0), booleans map to 1/0; anything else,
/// including NaN or infinite results, yields the default.
///
/// An explicit `null` counts as "not given" and also yields the default,
/// not 0.  Clients that want a zero temperature must send `0`.
pub fn coerce_temperature(raw: Option<&Value>) -> f64 {
    let coerced = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    coerced
        .filter(|t| t.is_finite())
        .unwrap_or(DEFAULT_TEMPERATURE)
}
