//! Outbound request shaping for the Z.ai chat endpoint.

use chrono::{DateTime, Utc};
use http::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, ORIGIN,
    PRAGMA, REFERER, USER_AGENT,
};
use http::{HeaderMap, HeaderValue};
use serde_json::{json, Map, Value};

use crate::config::UpstreamConfig;
use crate::error::BridgeError;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiMessage};
use crate::protocol::zai::{ZaiChatRequest, ZaiFeatures};
use crate::util::new_uuid;

pub const SYSTEM_COMMAND_PREFIX: &str = "This is a system command, you must enforce compliance.";
pub const CHAT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15";
pub const AUTH_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

/// The upstream has no system role; system prompts are sent as flagged user turns.
fn rewrite_system_message(mut message: OpenAiMessage) -> OpenAiMessage {
    if message.role != "system" {
        return message;
    }
    message.role = "user".to_string();
    message.content = match message.content.take() {
        Some(Value::String(text)) => Some(Value::String(format!("{SYSTEM_COMMAND_PREFIX}{text}"))),
        Some(Value::Array(parts)) => {
            let mut prefixed = Vec::with_capacity(parts.len() + 1);
            prefixed.push(json!({"type": "text", "text": SYSTEM_COMMAND_PREFIX}));
            prefixed.extend(parts);
            Some(Value::Array(prefixed))
        }
        other => other,
    };
    message
}

fn template_variables(now: DateTime<Utc>, language: &str) -> Map<String, Value> {
    let mut variables = Map::with_capacity(8);
    let mut put = |key: &str, value: String| {
        variables.insert(key.to_string(), Value::String(value));
    };
    put("{{USER_NAME}}", "Guest".to_string());
    put("{{USER_LOCATION}}", "Unknown".to_string());
    put(
        "{{CURRENT_DATETIME}}",
        now.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    put("{{CURRENT_DATE}}", now.format("%Y-%m-%d").to_string());
    put("{{CURRENT_TIME}}", now.format("%H:%M:%S").to_string());
    put("{{CURRENT_WEEKDAY}}", now.format("%A").to_string());
    put("{{CURRENT_TIMEZONE}}", "UTC".to_string());
    put("{{USER_LANGUAGE}}", language.to_string());
    variables
}

/// Build the upstream chat body from a client request.
#[must_use]
pub fn encode_zai_request(
    request: OpenAiChatRequest,
    upstream: &UpstreamConfig,
    now: DateTime<Utc>,
) -> ZaiChatRequest {
    let enable_thinking = request.wants_reasoning();
    let tools = request
        .tools
        .filter(|tools| !enable_thinking && !tools.is_empty());

    ZaiChatRequest {
        stream: true,
        model: request.model,
        messages: request
            .messages
            .into_iter()
            .map(rewrite_system_message)
            .collect(),
        params: Map::new(),
        features: ZaiFeatures {
            enable_thinking,
            ..ZaiFeatures::default()
        },
        variables: template_variables(now, &upstream.language),
        model_item: Map::new(),
        tools,
        chat_id: new_uuid(),
        id: new_uuid(),
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, BridgeError> {
    HeaderValue::from_str(value)
        .map_err(|e| BridgeError::Config(format!("Invalid value for header {name}: {e}")))
}

/// Browser-like header set the upstream expects on chat requests.
pub fn build_upstream_headers(
    upstream: &UpstreamConfig,
    token: &str,
) -> Result<HeaderMap, BridgeError> {
    let origin = upstream.origin();
    let mut headers = HeaderMap::with_capacity(16);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        header_value("Accept-Language", &upstream.language)?,
    );
    headers.insert(
        AUTHORIZATION,
        header_value("Authorization", &format!("Bearer {token}"))?,
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, header_value("Origin", origin)?);
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(REFERER, header_value("Referer", &format!("{origin}/"))?);
    headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CHAT_USER_AGENT));
    headers.insert(
        "x-fe-version",
        header_value("X-FE-Version", &upstream.fe_version)?,
    );
    Ok(headers)
}
