use crate::protocol::openai_chat::OpenAiUsage;
use crate::protocol::zai::UpstreamEvent;
use crate::stream::tool_block::ArgumentBuffer;

/// Whether the driver should keep reading upstream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// All needed data has arrived; stop reading and close the upstream.
    Stop,
}

/// Per-response translation state. Created at stream start, mutated only by
/// the phase state machine, dropped when the response ends.
#[derive(Debug)]
pub struct Session {
    pub current_id: String,
    pub current_model: String,
    pub content_index: usize,
    pub has_thinking: bool,
    pub has_tool_call: bool,
    pub tool: ArgumentBuffer,
    pub pending_usage: Option<OpenAiUsage>,
}

impl Session {
    #[must_use]
    pub fn new(seed_model: impl Into<String>) -> Self {
        Self {
            current_id: String::new(),
            current_model: seed_model.into(),
            content_index: 0,
            has_thinking: false,
            has_tool_call: false,
            tool: ArgumentBuffer::Idle,
            pending_usage: None,
        }
    }

    /// Absorb the sticky id and model of an event. Missing or empty values
    /// leave the previous ones in place.
    pub fn observe(&mut self, event: &UpstreamEvent) {
        if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty()) {
            id.clone_into(&mut self.current_id);
        }
        if let Some(model) = event.model.as_deref().filter(|model| !model.is_empty()) {
            model.clone_into(&mut self.current_model);
        }
    }

    /// Id of the currently open tool call, if any.
    #[must_use]
    pub fn open_tool_id(&self) -> Option<&str> {
        self.tool.tool_id()
    }
}
