//! Chat relay: forwards sanitised turns to the upstream completions API
//! and records one analytics event per outcome.

use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};

use crate::analytics::{Analytics, AnalyticsEvent};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::sanitize::{ChatRequest, ChatTurn};
use crate::util::{char_len, truncate_chars, RequestMeta};

pub const CREDENTIAL_VAR: &str = "OPENAI_API_KEY";
pub const EVENT_CHAT: &str = "coach_chat";
pub const EVENT_CHAT_ERROR: &str = "coach_chat_error";

const ERROR_BODY_SAMPLE_CHARS: usize = 512;
const PROMPT_SAMPLE_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    temperature: f64,
    messages: &'a [ChatTurn],
}

/// Upstream client plus the settings that shape each relayed call.
#[derive(Clone)]
pub struct ChatRelay {
    client: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    log_chat_content: bool,
}

impl ChatRelay {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        // No timeout: the upstream call runs until the client gives up.
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            client,
            completions_url: config.completions_url(),
            api_key: config.openai_api_key.clone(),
            log_chat_content: config.log_chat_content,
        })
    }

    /// Fails fast when the upstream credential is missing.
    pub fn api_key(&self) -> Result<&str, ApiError> {
        self.api_key
            .as_deref()
            .ok_or(ApiError::MissingCredential(CREDENTIAL_VAR))
    }

    /// Relay one chat request and return the assistant reply.
    pub async fn relay(
        &self,
        req: &ChatRequest,
        meta: &RequestMeta,
        analytics: &Analytics,
    ) -> Result<String, ApiError> {
        let api_key = self.api_key()?;

        let body = CompletionBody {
            model: &req.model,
            temperature: req.temperature,
            messages: &req.messages,
        };
        let resp = self
            .client
            .post(&self.completions_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("upstream request failed")
            .map_err(ApiError::Proxy)?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("failed to read upstream response body")
            .map_err(ApiError::Proxy)?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), model = %req.model, "upstream returned error status");
            let event = AnalyticsEvent::named(EVENT_CHAT_ERROR)
                .with_meta(meta)
                .with_payload(json!({
                    "status": status.as_u16(),
                    "body": truncate_chars(&text, ERROR_BODY_SAMPLE_CHARS),
                }));
            analytics.record(event).await;
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Value = serde_json::from_str(&text)
            .context("upstream returned invalid JSON")
            .map_err(ApiError::Proxy)?;
        let reply = extract_reply(&parsed).to_string();

        let last_user = req.last_user_content();
        let mut payload = json!({
            "model": req.model,
            "temperature": req.temperature,
            "prompt_len": char_len(last_user),
            "reply_len": char_len(&reply),
        });
        if self.log_chat_content {
            payload["prompt_sample"] = Value::String(truncate_chars(last_user, PROMPT_SAMPLE_CHARS));
        }
        analytics
            .record(
                AnalyticsEvent::named(EVENT_CHAT)
                    .with_meta(meta)
                    .with_payload(payload),
            )
            .await;

        Ok(reply)
    }
}

/// `choices[0].message.content`, or "" if any step is missing.
pub fn extract_reply(response: &Value) -> &str {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_extraction_tolerates_missing_levels() {
        assert_eq!(
            extract_reply(&json!({"choices": [{"message": {"content": "Hi there"}}]})),
            "Hi there"
        );
        assert_eq!(extract_reply(&json!({})), "");
        assert_eq!(extract_reply(&json!({"choices": []})), "");
        assert_eq!(extract_reply(&json!({"choices": [{"message": {}}]})), "");
        assert_eq!(
            extract_reply(&json!({"choices": [{"message": {"content": null}}]})),
            ""
        );
    }

    #[test]
    fn completion_body_shape() {
        let turns = vec![ChatTurn::new("user", "hello")];
        let body = CompletionBody {
            model: "gpt-4o-mini",
            temperature: 0.2,
            messages: &turns,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "temperature": 0.2,
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn missing_key_is_a_credential_error() {
        let relay = ChatRelay::new(&AppConfig::default()).unwrap();
        let err = relay.api_key().unwrap_err();
        assert_eq!(err.to_string(), "Missing OPENAI_API_KEY");
    }
}
