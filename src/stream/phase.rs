//! Phase state machine: one upstream event in, zero or more fragments out.

use crate::protocol::zai::{Phase, UpstreamEvent};
use crate::stream::fragment::{Emitted, FinishReason, OutputFragment};
use crate::stream::session::{Flow, Session};
use crate::stream::tool_block::{extract_blocks, finalize_tool_call};

const THINKING_HEADER_OPEN: &str = "<details";
const THINKING_HEADER_CLOSE: &str = "</summary>\n>";
const THINKING_END: &str = "</details>\n";
const TOOL_CALL_END: &str = "null,";

/// Apply one event to the session, appending produced fragments to `out` in
/// production order.
pub fn apply(session: &mut Session, event: &UpstreamEvent, out: &mut Vec<Emitted>) -> Flow {
    session.observe(event);
    match event.phase {
        Phase::Thinking => {
            on_thinking(session, event, out);
            Flow::Continue
        }
        Phase::ToolCall => {
            session.has_tool_call = true;
            if let Some(edit) = event.edit_content.as_deref() {
                extract_blocks(session, edit, out);
            }
            Flow::Continue
        }
        Phase::Answer => {
            if !session.has_tool_call {
                on_answer(session, event, out);
            }
            Flow::Continue
        }
        Phase::Other => on_other(session, event, out),
        Phase::Unknown => Flow::Continue,
    }
}

fn push(session: &Session, out: &mut Vec<Emitted>, fragment: OutputFragment) {
    out.push(Emitted {
        index: session.content_index,
        fragment,
    });
}

/// Drop the `<details ...><summary>...</summary>\n>` header the upstream
/// prefixes reasoning with.
fn strip_thinking_header(delta: &str) -> &str {
    if delta.starts_with(THINKING_HEADER_OPEN) {
        delta
            .rsplit(THINKING_HEADER_CLOSE)
            .next()
            .unwrap_or(delta)
            .trim()
    } else {
        delta
    }
}

fn on_thinking(session: &mut Session, event: &UpstreamEvent, out: &mut Vec<Emitted>) {
    session.has_thinking = true;
    let Some(delta) = event.delta_content.as_deref().filter(|d| !d.is_empty()) else {
        return;
    };
    let text = strip_thinking_header(delta);
    if text.is_empty() {
        return;
    }
    push(
        session,
        out,
        OutputFragment::ThinkingDelta {
            text: text.to_string(),
            signature: None,
        },
    );
}

fn on_answer(session: &mut Session, event: &UpstreamEvent, out: &mut Vec<Emitted>) {
    if let Some(edit) = event
        .edit_content
        .as_deref()
        .filter(|edit| edit.contains(THINKING_END))
    {
        if session.has_thinking {
            let signature = chrono::Utc::now().timestamp_millis().to_string();
            push(
                session,
                out,
                OutputFragment::ThinkingDelta {
                    text: String::new(),
                    signature: Some(signature),
                },
            );
            session.content_index += 1;
            session.has_thinking = false;
        }
        let remainder = edit.rsplit(THINKING_END).next().unwrap_or_default();
        if !remainder.is_empty() {
            push(session, out, OutputFragment::ContentDelta(remainder.to_string()));
        }
    }

    if let Some(delta) = event.delta_content.as_deref().filter(|d| !d.is_empty()) {
        push(session, out, OutputFragment::ContentDelta(delta.to_string()));
    }

    if let Some(usage) = &event.usage {
        push(
            session,
            out,
            OutputFragment::Finish {
                reason: FinishReason::Stop,
                usage: Some(usage.clone()),
            },
        );
    }
}

fn on_other(session: &mut Session, event: &UpstreamEvent, out: &mut Vec<Emitted>) -> Flow {
    if !session.has_tool_call {
        return Flow::Continue;
    }
    if let Some(usage) = &event.usage {
        session.pending_usage = Some(usage.clone());
    }
    let closes_call = event
        .edit_content
        .as_deref()
        .is_some_and(|edit| edit.starts_with(TOOL_CALL_END));
    if !closes_call {
        return Flow::Continue;
    }

    session.has_tool_call = false;
    if !finalize_tool_call(session, out) {
        tracing::warn!(
            chat_id = %session.current_id,
            "tool call ended without healable arguments; continuing"
        );
        return Flow::Continue;
    }
    let usage = session.pending_usage.take();
    push(
        session,
        out,
        OutputFragment::Finish {
            reason: FinishReason::ToolCalls,
            usage,
        },
    );
    Flow::Stop
}
