use serde_json::Value;

use crate::protocol::openai_chat::{
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiUsage,
};

/// Normalize a non-streaming upstream JSON completion into the `OpenAI` shape.
///
/// Only the first choice is kept. Missing content becomes an empty string and
/// missing usage becomes all zeros.
#[must_use]
pub fn decode_zai_json_completion(body: &Value, created: u64) -> OpenAiChatResponse {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());
    let message = choice.and_then(|c| c.get("message"));

    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string);
    let content = message
        .and_then(|m| m.get("content"))
        .filter(|content| !content.is_null() && content.as_str() != Some(""))
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));
    let raw_tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .filter(|calls| calls.as_array().is_some_and(|calls| !calls.is_empty()));
    let mut extra = serde_json::Map::new();
    let tool_calls = raw_tool_calls.and_then(|calls| {
        match serde_json::from_value::<Vec<OpenAiToolCall>>(calls.clone()) {
            Ok(typed) => Some(typed),
            Err(err) => {
                tracing::debug!(error = %err, "passing upstream tool_calls through untyped");
                extra.insert("tool_calls".to_string(), calls.clone());
                None
            }
        }
    });
    let usage = body
        .get("usage")
        .and_then(|usage| serde_json::from_value::<OpenAiUsage>(usage.clone()).ok())
        .unwrap_or_default();

    OpenAiChatResponse {
        id: string_field(body, "id"),
        object: "chat.completion".to_string(),
        created,
        model: string_field(body, "model"),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content: Some(content),
                tool_calls,
                extra,
                ..OpenAiMessage::default()
            },
            finish_reason,
        }],
        usage,
    }
}

fn string_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_identity_content_and_usage() {
        let body = json!({
            "id": "chat-9",
            "model": "glm-4.5",
            "created": 1,
            "choices": [{
                "index": 3,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "Hello", "extra": true}
            }],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
        });
        let response = decode_zai_json_completion(&body, 77);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["id"], "chat-9");
        assert_eq!(value["model"], "glm-4.5");
        assert_eq!(value["created"], 77);
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["index"], 0);
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello");
        assert!(value["choices"][0]["message"].get("extra").is_none());
        assert_eq!(value["usage"]["total_tokens"], 5);
    }

    #[test]
    fn fills_defaults_for_sparse_bodies() {
        let body = json!({"id": "x", "choices": [{"message": {"content": null}}]});
        let response = decode_zai_json_completion(&body, 1);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["choices"][0]["finish_reason"], Value::Null);
        assert_eq!(value["choices"][0]["message"]["content"], "");
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["model"], "");
        assert_eq!(
            value["usage"],
            json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0})
        );
    }

    #[test]
    fn keeps_tool_calls() {
        let body = json!({
            "id": "x",
            "model": "glm-4.5",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {"tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "f", "arguments": "{}"}
                }]}
            }]
        });
        let response = decode_zai_json_completion(&body, 1);
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "f");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn passes_nonconforming_tool_calls_through() {
        let calls = json!([{
            "id": "call_2",
            "type": "function",
            "function": {"name": "g", "arguments": {"city": "Paris"}}
        }]);
        let body = json!({
            "id": "x",
            "choices": [{"finish_reason": "tool_calls", "message": {"tool_calls": calls}}]
        });
        let response = decode_zai_json_completion(&body, 1);
        assert!(response.choices[0].message.tool_calls.is_none());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["message"]["tool_calls"], calls);
    }
}
