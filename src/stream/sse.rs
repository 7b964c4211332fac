/// Line decoder and SSE frame helpers for the upstream event stream.
///
/// The upstream frames every event as one `data: <json>` line. Bytes arrive
/// in arbitrary chunks, so both partial lines and partial UTF-8 sequences are
/// carried over between reads.
use memchr::memchr_iter;

use crate::protocol::zai::{UpstreamEvent, ZaiEnvelope};

/// Terminal sentinel of an `OpenAI` chunk stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

// ---------------------------------------------------------------------------
// LineDecoder: incremental byte-to-line decoder
// ---------------------------------------------------------------------------

/// Incremental UTF-8 line decoder.
///
/// Feed it raw byte chunks and it yields complete lines (without the line
/// terminator). A trailing partial line is never flushed: the upstream always
/// terminates events with a newline, so an unterminated tail at end of input
/// is dropped.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
    read_offset: usize,
    remainder: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return any complete lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append complete lines into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.push_decoded(chunk);

        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            out.push(line.to_owned());
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }

    fn push_decoded(&mut self, chunk: &[u8]) {
        let joined;
        let mut bytes: &[u8] = if self.remainder.is_empty() {
            chunk
        } else {
            self.remainder.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.remainder);
            &joined
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    // valid_up_to is always a char boundary.
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            self.remainder.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event parsing
// ---------------------------------------------------------------------------

/// Parse one upstream line into an event.
///
/// Returns `None` for non-`data:` lines (comments, keep-alives), empty
/// payloads, envelopes that are not chat completion events, and malformed
/// JSON. Malformed lines are logged and skipped, never surfaced.
#[must_use]
pub fn parse_upstream_line(line: &str) -> Option<UpstreamEvent> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<ZaiEnvelope>(payload) {
        Ok(envelope) => envelope.into_event(),
        Err(err) => {
            tracing::debug!(error = %err, payload, "dropping malformed upstream data line");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format an OpenAI-style SSE frame (no event type, just data).
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
