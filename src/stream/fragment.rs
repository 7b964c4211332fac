use crate::protocol::openai_chat::OpenAiUsage;

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
        }
    }
}

/// Transport-agnostic unit of output produced by the phase state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFragment {
    ContentDelta(String),
    /// Reasoning text. A fragment carrying a signature closes the thinking block.
    ThinkingDelta {
        text: String,
        signature: Option<String>,
    },
    ToolCallStart {
        tool_id: String,
        name: String,
    },
    /// Healed arguments of the open tool call, emitted once when it closes.
    ToolCallArgsDelta {
        tool_id: String,
        arguments: String,
    },
    Finish {
        reason: FinishReason,
        usage: Option<OpenAiUsage>,
    },
}

/// A fragment tagged with the content index that was current when it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub index: usize,
    pub fragment: OutputFragment,
}
