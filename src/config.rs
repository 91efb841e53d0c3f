use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub ssl: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub database: Option<DatabaseConfig>,
    pub allowed_origins: HashSet<String>,
    pub log_chat_content: bool,
    pub analytics_timeout_ms: u64,
    pub max_request_bytes: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            database: None,
            allowed_origins: parse_origin_list(DEFAULT_ALLOWED_ORIGINS),
            log_chat_content: false,
            analytics_timeout_ms: 2000,
            max_request_bytes: 1024 * 1024,
            port: DEFAULT_PORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let openai_base_url = non_empty_var("OPENAI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.openai_base_url);

        let database = match non_empty_var("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                ssl: parse_bool_env("DATABASE_SSL")?.unwrap_or(false),
                max_connections: parse_optional_u64("DATABASE_MAX_CONNECTIONS")?
                    .map(|n| n.clamp(1, 64) as u32)
                    .unwrap_or(5),
            }),
            None => None,
        };

        let allowed_origins = non_empty_var("ALLOWED_ORIGINS")
            .map(|raw| parse_origin_list(&raw))
            .unwrap_or(defaults.allowed_origins);

        let log_chat_content = parse_bool_env("LOG_CHAT_CONTENT")?.unwrap_or(false);
        let analytics_timeout_ms =
            parse_optional_u64("ANALYTICS_TIMEOUT_MS")?.unwrap_or(defaults.analytics_timeout_ms);
        let max_request_bytes = parse_optional_u64("MAX_REQUEST_BYTES")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_request_bytes);
        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be between 0 and 65535"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            openai_api_key,
            openai_base_url,
            database,
            allowed_origins,
            log_chat_content,
            analytics_timeout_ms,
            max_request_bytes,
            port,
        })
    }

    /// Full URL of the upstream chat completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.openai_base_url)
    }
}

/// Read the analytics sample rate.  Called on every tracking request so the
/// rate can be tuned on a live process.  Unset, unparseable or non-finite
/// values mean "record everything".
pub fn sample_rate_from_env() -> f64 {
    env::var("ANALYTICS_SAMPLE_RATE")
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|rate| rate.is_finite())
        .unwrap_or(1.0)
}

fn parse_origin_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset and blank are both "not configured".  A value that is not valid
/// unicode is an error so a mangled setting never passes as a default.
fn configured_var(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) => Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("{} is not valid unicode: {}", var, err)),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    configured_var(var)?
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| anyhow!("{} must be a whole number of 0 or more, got {:?}", var, value))
        })
        .transpose()
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    configured_var(var)?
        .map(|value| {
            parse_bool(&value).ok_or_else(|| {
                anyhow!("{} must be true/false, yes/no, on/off or 1/0, got {:?}", var, value)
            })
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
