//! Tool-call block extraction and argument healing.
//!
//! The upstream wraps each tool invocation in a `<glm_block >...</glm_block>`
//! span whose JSON body carries `data.metadata.{id,name,arguments}`. The
//! `arguments` value arrives truncated; the rest of it streams in as raw text
//! ahead of the next block (or ahead of the `"result` key that closes the
//! invocation). The buffer holding that text is never valid JSON until the
//! call is finalized and its missing closer is appended.

use serde::Deserialize;

use crate::stream::fragment::{Emitted, OutputFragment};
use crate::stream::session::Session;

pub const BLOCK_OPEN: &str = "<glm_block >";
pub const BLOCK_CLOSE: &str = "</glm_block>";
const RESULT_KEY: &str = "\"result";

#[derive(Debug, thiserror::Error)]
pub enum HealError {
    #[error("tool call {tool_id} arguments did not heal into JSON: {source}")]
    InvalidJson {
        tool_id: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A finalized tool call with valid arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct HealedCall {
    pub tool_id: String,
    pub arguments: serde_json::Value,
}

impl HealedCall {
    /// Arguments in `OpenAI` wire form. A healed JSON string already holds the
    /// serialized arguments object, so it is unwrapped instead of re-quoted.
    #[must_use]
    pub fn arguments_string(&self) -> String {
        match &self.arguments {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Accumulator for the arguments of the open tool call.
#[derive(Debug, Default)]
pub enum ArgumentBuffer {
    #[default]
    Idle,
    Open(OpenCall),
}

#[derive(Debug)]
pub struct OpenCall {
    pub tool_id: String,
    raw: String,
    /// Closing character stripped from the seed, re-appended at finalize.
    closer: Option<char>,
    /// Set once the argument tail before `"result` was taken.
    sealed: bool,
}

impl ArgumentBuffer {
    /// Open a call, seeding it with the serialized truncated arguments minus
    /// their closing character.
    #[must_use]
    pub fn open(tool_id: impl Into<String>, arguments: &serde_json::Value) -> Self {
        let mut raw = arguments.to_string();
        let closer = match raw.chars().last() {
            Some(ch @ ('"' | '}' | ']')) => {
                raw.pop();
                Some(ch)
            }
            _ => None,
        };
        Self::Open(OpenCall {
            tool_id: tool_id.into(),
            raw,
            closer,
            sealed: false,
        })
    }

    #[must_use]
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Open(call) => Some(call.tool_id.as_str()),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Length of the backslash run at the end of the buffered text.
    #[must_use]
    pub fn trailing_backslashes(&self) -> usize {
        match self {
            Self::Open(call) if !call.sealed => trailing_backslashes(&call.raw),
            _ => 0,
        }
    }

    /// Append a streamed argument fragment. Ignored when idle or sealed.
    pub fn push_fragment(&mut self, text: &str) {
        if let Self::Open(call) = self {
            if !call.sealed {
                call.raw.push_str(text);
            }
        }
    }

    /// Append the final fragment of the call; later fragments are ignored.
    pub fn push_tail(&mut self, text: &str) {
        self.push_fragment(text);
        if let Self::Open(call) = self {
            call.sealed = true;
        }
    }

    /// Close the open call: append its closer and parse. Always resets to idle.
    pub fn finalize(&mut self) -> Option<Result<HealedCall, HealError>> {
        let Self::Open(mut call) = std::mem::take(self) else {
            return None;
        };
        if let Some(closer) = call.closer {
            call.raw.push(closer);
        }
        Some(match serde_json::from_str(&call.raw) {
            Ok(arguments) => Ok(HealedCall {
                tool_id: call.tool_id,
                arguments,
            }),
            Err(source) => Err(HealError::InvalidJson {
                tool_id: call.tool_id,
                raw: call.raw,
                source,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    data: BlockData,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    metadata: BlockMetadata,
}

#[derive(Debug, Deserialize)]
struct BlockMetadata {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Finalize the open tool call, if any. Emits the healed arguments and
/// returns `true` on success; a heal failure is logged and dropped.
pub fn finalize_tool_call(session: &mut Session, out: &mut Vec<Emitted>) -> bool {
    match session.tool.finalize() {
        Some(Ok(healed)) => {
            out.push(Emitted {
                index: session.content_index,
                fragment: OutputFragment::ToolCallArgsDelta {
                    arguments: healed.arguments_string(),
                    tool_id: healed.tool_id,
                },
            });
            true
        }
        Some(Err(HealError::InvalidJson {
            tool_id,
            raw,
            source,
        })) => {
            tracing::warn!(
                tool_id,
                raw_arguments = raw,
                error = %source,
                "dropping tool call with unparseable arguments"
            );
            false
        }
        None => false,
    }
}

/// Feed one `tool_call` edit-content payload through the extractor.
pub fn extract_blocks(session: &mut Session, edit_content: &str, out: &mut Vec<Emitted>) {
    let mut segments = edit_content.split(BLOCK_OPEN);
    if let Some(leading) = segments.next() {
        absorb_leading_text(session, leading);
    }
    for segment in segments {
        let Some(close_at) = segment.rfind(BLOCK_CLOSE) else {
            continue;
        };
        open_block(session, &segment[..close_at], out);
    }
}

fn absorb_leading_text(session: &mut Session, leading: &str) {
    if !session.tool.is_open() || leading.is_empty() {
        return;
    }
    if !leading.contains(BLOCK_CLOSE) {
        session.tool.push_fragment(leading);
        return;
    }
    let carried = session.tool.trailing_backslashes();
    match find_result_key(leading, carried).and_then(|at| argument_tail(&leading[..at])) {
        Some(tail) => session.tool.push_tail(tail),
        None => tracing::debug!(edit = leading, "closing tool fragment without result key"),
    }
}

/// Position of the first `"result` whose quote is not escaped. Inside the
/// argument string the same text appears as `\"result`. `carried` is the
/// backslash run ending the previous fragment.
fn find_result_key(text: &str, carried: usize) -> Option<usize> {
    text.match_indices(RESULT_KEY)
        .map(|(at, _)| at)
        .find(|&at| {
            let mut backslashes = trailing_backslashes(&text[..at]);
            if backslashes == at {
                backslashes += carried;
            }
            backslashes % 2 == 0
        })
}

fn trailing_backslashes(text: &str) -> usize {
    text.bytes().rev().take_while(|&b| b == b'\\').count()
}

/// Strip the `", ` separating the argument string from the `"result` key.
fn argument_tail(before_result: &str) -> Option<&str> {
    before_result
        .trim_end()
        .strip_suffix(',')
        .and_then(|rest| rest.trim_end().strip_suffix('"'))
        .or_else(|| {
            before_result
                .len()
                .checked_sub(3)
                .and_then(|end| before_result.get(..end))
        })
}

fn open_block(session: &mut Session, body: &str, out: &mut Vec<Emitted>) {
    let metadata = match serde_json::from_str::<BlockEnvelope>(body) {
        Ok(envelope) => envelope.data.metadata,
        Err(err) => {
            tracing::warn!(error = %err, block = body, "skipping unparseable tool block");
            return;
        }
    };

    finalize_tool_call(session, out);

    session.content_index += 1;
    session.tool = ArgumentBuffer::open(metadata.id.clone(), &metadata.arguments);
    out.push(Emitted {
        index: session.content_index,
        fragment: OutputFragment::ToolCallStart {
            tool_id: metadata.id,
            name: metadata.name,
        },
    });
}
