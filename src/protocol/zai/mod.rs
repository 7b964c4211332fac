//! Wire types for the Z.ai chat endpoint.
//!
//! The upstream streams `data: {"type":"chat:completion","data":{...}}` lines
//! whose `phase` tells which kind of content the event carries.

pub mod encoder;
pub mod response_decoder;

use serde::{Deserialize, Serialize};

use crate::protocol::openai_chat::{lenient_usage, OpenAiMessage, OpenAiUsage};

/// Envelope `type` tag of the events this crate translates.
pub const CHAT_COMPLETION_EVENT: &str = "chat:completion";

/// Content kind of one upstream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Thinking,
    ToolCall,
    Answer,
    Other,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One decoded upstream event (the `data` object of a `chat:completion` line).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEvent {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_content: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_usage",
        skip_serializing_if = "Option::is_none"
    )]
    pub usage: Option<OpenAiUsage>,
}

/// Outer envelope of an upstream data line.
#[derive(Debug, Clone, Deserialize)]
pub struct ZaiEnvelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Option<UpstreamEvent>,
}

impl ZaiEnvelope {
    /// Unwrap the event if this envelope is a chat completion event.
    #[must_use]
    pub fn into_event(self) -> Option<UpstreamEvent> {
        if self.kind == CHAT_COMPLETION_EVENT {
            self.data
        } else {
            None
        }
    }
}

/// How the upstream framed its response body, from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamBodyKind {
    Json,
    EventStream,
    Other,
}

impl UpstreamBodyKind {
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("application/json") {
            Self::Json
        } else if content_type.contains("stream") {
            Self::EventStream
        } else {
            Self::Other
        }
    }
}

/// Chat request body posted to the upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ZaiChatRequest {
    pub stream: bool,
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub features: ZaiFeatures,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub model_item: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    pub chat_id: String,
    pub id: String,
}

/// Feature switches sent with every upstream chat request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZaiFeatures {
    pub image_generation: bool,
    pub web_search: bool,
    pub auto_web_search: bool,
    pub preview_mode: bool,
    pub flags: Vec<String>,
    pub features: Vec<String>,
    pub enable_thinking: bool,
}

/// Body of the guest auth endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ZaiAuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_into_event() {
        let envelope: ZaiEnvelope = serde_json::from_value(json!({
            "type": "chat:completion",
            "data": {"phase": "tool_call", "edit_content": "x", "id": "chat-1"}
        }))
        .unwrap();
        let event = envelope.into_event().unwrap();
        assert_eq!(event.phase, Phase::ToolCall);
        assert_eq!(event.id.as_deref(), Some("chat-1"));
        assert_eq!(event.edit_content.as_deref(), Some("x"));
    }

    #[test]
    fn test_other_envelope_types_are_skipped() {
        let envelope: ZaiEnvelope = serde_json::from_value(json!({
            "type": "chat:title",
            "data": {"phase": "answer"}
        }))
        .unwrap();
        assert!(envelope.into_event().is_none());
    }

    #[test]
    fn test_unknown_phase_tolerated() {
        let event: UpstreamEvent = serde_json::from_value(json!({"phase": "search"})).unwrap();
        assert_eq!(event.phase, Phase::Unknown);
        let event: UpstreamEvent = serde_json::from_value(json!({})).unwrap();
        assert_eq!(event.phase, Phase::Unknown);
    }

    #[test]
    fn test_body_kind_from_content_type() {
        assert_eq!(
            UpstreamBodyKind::from_content_type("application/json; charset=utf-8"),
            UpstreamBodyKind::Json
        );
        assert_eq!(
            UpstreamBodyKind::from_content_type("text/event-stream"),
            UpstreamBodyKind::EventStream
        );
        assert_eq!(
            UpstreamBodyKind::from_content_type("application/x-ndjson-stream"),
            UpstreamBodyKind::EventStream
        );
        assert_eq!(
            UpstreamBodyKind::from_content_type("text/html"),
            UpstreamBodyKind::Other
        );
    }
}
