//! Output assembler: renders fragments into an aggregated completion
//! (buffered mode) or into wire chunks (streaming mode).

use bytes::Bytes;

use crate::error::BridgeError;
use crate::protocol::openai_chat::{
    OpenAiChatResponse, OpenAiChoice, OpenAiDelta, OpenAiMessage, OpenAiStreamChoice,
    OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiStreamToolCallFunction, OpenAiThinking,
    OpenAiToolCall, OpenAiToolCallFunction, OpenAiUsage,
};
use crate::stream::fragment::{Emitted, FinishReason, OutputFragment};
use crate::stream::session::Session;
use crate::stream::sse::openai_sse_frame;

pub const SYSTEM_FINGERPRINT: &str = "fp_zai_001";
pub const COMPLETION_OBJECT: &str = "chat.completion";
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
const ASSISTANT_ROLE: &str = "assistant";
const FUNCTION_TYPE: &str = "function";

// ---------------------------------------------------------------------------
// Buffered mode
// ---------------------------------------------------------------------------

/// Accumulates fragments into one chat completion.
#[derive(Debug, Default)]
pub struct CompletionAggregator {
    content: String,
    thinking: Option<OpenAiThinking>,
    tool_calls: Vec<OpenAiToolCall>,
    /// Started call waiting for its healed arguments. A call whose arguments
    /// never heal is dropped.
    pending_call: Option<(String, String)>,
    finish_reason: Option<FinishReason>,
    usage: Option<OpenAiUsage>,
}

impl CompletionAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: OutputFragment) {
        match fragment {
            OutputFragment::ContentDelta(text) => self.content.push_str(&text),
            OutputFragment::ThinkingDelta { text, signature } => {
                let thinking = self.thinking.get_or_insert_with(OpenAiThinking::default);
                thinking.content.push_str(&text);
                if signature.is_some() {
                    thinking.signature = signature;
                }
            }
            OutputFragment::ToolCallStart { tool_id, name } => {
                self.pending_call = Some((tool_id, name));
            }
            OutputFragment::ToolCallArgsDelta { tool_id, arguments } => {
                let name = match self.pending_call.take() {
                    Some((pending_id, name)) if pending_id == tool_id => name,
                    _ => String::new(),
                };
                self.tool_calls.push(OpenAiToolCall {
                    id: tool_id,
                    type_: FUNCTION_TYPE.to_string(),
                    function: OpenAiToolCallFunction { name, arguments },
                });
            }
            OutputFragment::Finish { reason, usage } => {
                self.finish_reason = Some(reason);
                if usage.is_some() {
                    self.usage = usage;
                }
            }
        }
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Build the completion, taking id and model from the session.
    #[must_use]
    pub fn into_response(self, session: &Session, created: u64) -> OpenAiChatResponse {
        let message = OpenAiMessage {
            role: ASSISTANT_ROLE.to_string(),
            content: Some(serde_json::Value::String(self.content)),
            thinking: self.thinking,
            tool_calls: (!self.tool_calls.is_empty()).then_some(self.tool_calls),
            ..OpenAiMessage::default()
        };
        OpenAiChatResponse {
            id: session.current_id.clone(),
            object: COMPLETION_OBJECT.to_string(),
            created,
            model: session.current_model.clone(),
            choices: vec![OpenAiChoice {
                index: 0,
                message,
                finish_reason: self.finish_reason.map(|r| r.as_str().to_string()),
            }],
            usage: self.usage.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming mode
// ---------------------------------------------------------------------------

/// Renders each fragment into exactly one `chat.completion.chunk`.
#[derive(Debug)]
pub struct ChunkEncoder {
    created: u64,
    tool_calls_started: u32,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(created: u64) -> Self {
        Self {
            created,
            tool_calls_started: 0,
        }
    }

    #[must_use]
    pub fn encode(&mut self, session: &Session, emitted: Emitted) -> OpenAiStreamChunk {
        let mut delta = OpenAiDelta {
            role: Some(ASSISTANT_ROLE.to_string()),
            ..OpenAiDelta::default()
        };
        let mut finish_reason = None;
        let mut usage = None;

        match emitted.fragment {
            OutputFragment::ContentDelta(text) => delta.content = Some(text),
            OutputFragment::ThinkingDelta { text, signature } => {
                delta.thinking = Some(OpenAiThinking {
                    content: text,
                    signature,
                });
            }
            OutputFragment::ToolCallStart { tool_id, name } => {
                let ordinal = self.tool_calls_started;
                self.tool_calls_started += 1;
                delta.tool_calls = Some(vec![OpenAiStreamToolCall {
                    index: ordinal,
                    id: Some(tool_id),
                    type_: Some(FUNCTION_TYPE.to_string()),
                    function: Some(OpenAiStreamToolCallFunction {
                        name: Some(name),
                        arguments: Some(String::new()),
                    }),
                }]);
            }
            OutputFragment::ToolCallArgsDelta { tool_id, arguments } => {
                delta.tool_calls = Some(vec![OpenAiStreamToolCall {
                    index: self.tool_calls_started.saturating_sub(1),
                    id: Some(tool_id),
                    type_: Some(FUNCTION_TYPE.to_string()),
                    function: Some(OpenAiStreamToolCallFunction {
                        name: None,
                        arguments: Some(arguments),
                    }),
                }]);
            }
            OutputFragment::Finish {
                reason,
                usage: finish_usage,
            } => {
                match reason {
                    FinishReason::Stop => delta.content = Some(String::new()),
                    FinishReason::ToolCalls => delta.tool_calls = Some(Vec::new()),
                }
                finish_reason = Some(reason.as_str().to_string());
                usage = finish_usage;
            }
        }

        OpenAiStreamChunk {
            id: session.current_id.clone(),
            object: CHUNK_OBJECT.to_string(),
            created: self.created,
            model: session.current_model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
            choices: vec![OpenAiStreamChoice {
                index: u32::try_from(emitted.index).unwrap_or(u32::MAX),
                delta,
                finish_reason,
                logprobs: None,
            }],
            usage,
        }
    }

    /// Encode one fragment as a complete `data: ...\n\n` frame.
    pub fn encode_frame(&mut self, session: &Session, emitted: Emitted) -> Result<Bytes, BridgeError> {
        let chunk = self.encode(session, emitted);
        let json = serde_json::to_string(&chunk)
            .map_err(|e| BridgeError::Translation(format!("Failed to encode chunk: {e}")))?;
        Ok(Bytes::from(openai_sse_frame(&json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        let mut session = Session::new("glm-4.5");
        session.current_id = "chat-1".to_string();
        session
    }

    #[test]
    fn aggregator_concatenates_in_order() {
        let mut agg = CompletionAggregator::new();
        agg.push(OutputFragment::ThinkingDelta {
            text: "a".to_string(),
            signature: None,
        });
        agg.push(OutputFragment::ThinkingDelta {
            text: String::new(),
            signature: Some("1700000000000".to_string()),
        });
        agg.push(OutputFragment::ContentDelta("Hel".to_string()));
        agg.push(OutputFragment::ContentDelta("lo".to_string()));
        agg.push(OutputFragment::Finish {
            reason: FinishReason::Stop,
            usage: None,
        });

        let response = agg.into_response(&session(), 42);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], "chat-1");
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["created"], 42);
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello");
        assert_eq!(value["choices"][0]["message"]["thinking"]["content"], "a");
        assert_eq!(
            value["choices"][0]["message"]["thinking"]["signature"],
            "1700000000000"
        );
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 0);
        assert!(value["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[test]
    fn aggregator_records_only_healed_calls() {
        let mut agg = CompletionAggregator::new();
        agg.push(OutputFragment::ToolCallStart {
            tool_id: "call_bad".to_string(),
            name: "broken".to_string(),
        });
        agg.push(OutputFragment::ToolCallStart {
            tool_id: "call_1".to_string(),
            name: "search".to_string(),
        });
        agg.push(OutputFragment::ToolCallArgsDelta {
            tool_id: "call_1".to_string(),
            arguments: r#"{"q":"x"}"#.to_string(),
        });
        agg.push(OutputFragment::Finish {
            reason: FinishReason::ToolCalls,
            usage: Some(OpenAiUsage {
                total_tokens: 7,
                ..OpenAiUsage::default()
            }),
        });
        assert_eq!(agg.finish_reason(), Some(FinishReason::ToolCalls));

        let response = agg.into_response(&session(), 1);
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"x"}"#);
        assert_eq!(response.usage.total_tokens, 7);
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn chunk_carries_content_index_and_fingerprint() {
        let mut encoder = ChunkEncoder::new(99);
        let chunk = encoder.encode(
            &session(),
            Emitted {
                index: 2,
                fragment: OutputFragment::ContentDelta("hi".to_string()),
            },
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "chat-1",
                "object": "chat.completion.chunk",
                "created": 99,
                "model": "glm-4.5",
                "system_fingerprint": "fp_zai_001",
                "choices": [{
                    "index": 2,
                    "delta": {"role": "assistant", "content": "hi"},
                    "finish_reason": null,
                    "logprobs": null
                }]
            })
        );
    }

    #[test]
    fn tool_call_chunks_share_ordinal() {
        let mut encoder = ChunkEncoder::new(1);
        let session = session();
        let start = serde_json::to_value(encoder.encode(
            &session,
            Emitted {
                index: 1,
                fragment: OutputFragment::ToolCallStart {
                    tool_id: "call_1".to_string(),
                    name: "search".to_string(),
                },
            },
        ))
        .unwrap();
        let args = serde_json::to_value(encoder.encode(
            &session,
            Emitted {
                index: 1,
                fragment: OutputFragment::ToolCallArgsDelta {
                    tool_id: "call_1".to_string(),
                    arguments: "{}".to_string(),
                },
            },
        ))
        .unwrap();

        let start_call = &start["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(start_call["index"], 0);
        assert_eq!(start_call["type"], "function");
        assert_eq!(start_call["function"]["name"], "search");
        let args_call = &args["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(args_call["index"], 0);
        assert_eq!(args_call["function"]["arguments"], "{}");
        assert!(args_call["function"].get("name").is_none());
    }

    #[test]
    fn finish_chunk_has_reason_and_usage() {
        let mut encoder = ChunkEncoder::new(1);
        let frame = encoder
            .encode_frame(
                &session(),
                Emitted {
                    index: 0,
                    fragment: OutputFragment::Finish {
                        reason: FinishReason::ToolCalls,
                        usage: Some(OpenAiUsage {
                            total_tokens: 3,
                            ..OpenAiUsage::default()
                        }),
                    },
                },
            )
            .unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        let value: serde_json::Value =
            serde_json::from_str(text.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(value["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(value["choices"][0]["delta"]["tool_calls"], json!([]));
        assert_eq!(value["usage"]["total_tokens"], 3);
    }
}
