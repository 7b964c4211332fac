//! Session driver: owns the upstream read loop for one response.
//!
//! Each upstream chunk is decoded and its lines are run through the phase
//! state machine to completion before the next read, so output order always
//! equals upstream line order. The only suspension point is the next read.

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiUsage};
use crate::stream::assembler::{ChunkEncoder, CompletionAggregator};
use crate::stream::fragment::{Emitted, FinishReason, OutputFragment};
use crate::stream::phase::apply;
use crate::stream::session::{Flow, Session};
use crate::stream::sse::{parse_upstream_line, LineDecoder, DONE_FRAME};
use crate::util::unix_now_secs;

/// Decoder plus session: bytes in, fragments out.
#[derive(Debug)]
pub struct SessionTranslator {
    decoder: LineDecoder,
    session: Session,
    lines: Vec<String>,
    stopped: bool,
}

impl SessionTranslator {
    #[must_use]
    pub fn new(seed_model: &str) -> Self {
        Self {
            decoder: LineDecoder::new(),
            session: Session::new(seed_model),
            lines: Vec::with_capacity(8),
            stopped: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Feed one upstream chunk. Returns `Flow::Stop` once the state machine
    /// signalled that all needed data has arrived; lines after that point and
    /// any later chunks are ignored.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Emitted>) -> Flow {
        if self.stopped {
            return Flow::Stop;
        }
        self.decoder.feed_into(chunk, &mut self.lines);
        for line in self.lines.drain(..) {
            tracing::trace!(line, "upstream line");
            let Some(event) = parse_upstream_line(&line) else {
                continue;
            };
            if apply(&mut self.session, &event, out) == Flow::Stop {
                self.stopped = true;
                break;
            }
        }
        self.lines.clear();
        if self.stopped {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

fn transport_error(err: impl std::fmt::Display) -> BridgeError {
    BridgeError::Transport(format!("Upstream read failed: {err}"))
}

/// Translate an upstream event stream into one aggregated completion.
pub async fn translate_buffered<S, E>(
    byte_stream: S,
    seed_model: &str,
) -> Result<OpenAiChatResponse, BridgeError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut upstream = std::pin::pin!(byte_stream);
    let mut translator = SessionTranslator::new(seed_model);
    let mut aggregator = CompletionAggregator::new();
    let mut emitted = Vec::with_capacity(8);

    while let Some(chunk) = upstream.next().await {
        let chunk = chunk.map_err(transport_error)?;
        let flow = translator.feed(&chunk, &mut emitted);
        for item in emitted.drain(..) {
            aggregator.push(item.fragment);
        }
        if flow == Flow::Stop {
            break;
        }
    }

    let finish_reason = aggregator.finish_reason();
    let response = aggregator.into_response(translator.session(), unix_now_secs());
    log_request_complete(
        &response.model,
        finish_reason.map(FinishReason::as_str),
        Some(&response.usage),
        started,
    );
    Ok(response)
}

struct PendingBytes {
    chunks: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingBytes {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut chunks = SmallVec::new();
        chunks.reserve(capacity);
        Self { chunks, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.chunks.len() {
            return None;
        }
        let chunk = std::mem::take(&mut self.chunks[self.head]);
        self.head += 1;
        if self.head == self.chunks.len() {
            self.chunks.clear();
            self.head = 0;
        }
        Some(chunk)
    }

    #[inline]
    fn push(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.head = 0;
    }
}

struct StreamState<S> {
    upstream: Option<Pin<Box<S>>>,
    translator: SessionTranslator,
    encoder: ChunkEncoder,
    emitted: Vec<Emitted>,
    pending: PendingBytes,
    finish: Option<(FinishReason, Option<OpenAiUsage>)>,
    started: Instant,
    done: bool,
}

impl<S> StreamState<S> {
    fn new(byte_stream: S, seed_model: &str) -> Self {
        Self {
            upstream: Some(Box::pin(byte_stream)),
            translator: SessionTranslator::new(seed_model),
            encoder: ChunkEncoder::new(unix_now_secs()),
            emitted: Vec::with_capacity(8),
            pending: PendingBytes::with_capacity(8),
            finish: None,
            started: Instant::now(),
            done: false,
        }
    }

    /// End the stream on an error: nothing queued before it is delivered.
    fn fail(&mut self) {
        self.upstream = None;
        self.pending.clear();
        self.emitted.clear();
        self.done = true;
    }

    /// Encode queued fragments into frames, in production order.
    fn encode_emitted(&mut self) -> Result<(), BridgeError> {
        for item in self.emitted.drain(..) {
            if let OutputFragment::Finish { reason, usage } = &item.fragment {
                self.finish = Some((*reason, usage.clone()));
            }
            let frame = self.encoder.encode_frame(self.translator.session(), item)?;
            self.pending.push(frame);
        }
        Ok(())
    }

    /// Close the upstream and queue the terminal sentinel.
    fn finish_stream(&mut self) {
        self.upstream = None;
        self.pending.push(Bytes::from_static(DONE_FRAME.as_bytes()));
        self.done = true;
        let (reason, usage) = match &self.finish {
            Some((reason, usage)) => (Some(reason.as_str()), usage.as_ref()),
            None => (None, None),
        };
        log_request_complete(
            &self.translator.session().current_model,
            reason,
            usage,
            self.started,
        );
    }
}

/// Translate an upstream event stream into `chat.completion.chunk` frames
/// followed by exactly one `data: [DONE]` frame.
///
/// A transport failure yields a single `Err` after all frames produced so far
/// and ends the stream without the sentinel.
pub fn translate_streaming<S, E>(
    byte_stream: S,
    seed_model: &str,
) -> impl Stream<Item = Result<Bytes, BridgeError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = StreamState::new(byte_stream, seed_model);

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.done {
                return None;
            }
            let Some(upstream) = state.upstream.as_mut() else {
                state.finish_stream();
                continue;
            };
            let next = upstream.as_mut().next().await;
            match next {
                Some(Ok(chunk)) => {
                    let flow = state.translator.feed(&chunk, &mut state.emitted);
                    if let Err(err) = state.encode_emitted() {
                        state.fail();
                        return Some((Err(err), state));
                    }
                    if flow == Flow::Stop {
                        state.finish_stream();
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream stream failed mid-response");
                    state.fail();
                    return Some((Err(transport_error(err)), state));
                }
                None => state.finish_stream(),
            }
        }
    })
}
