//! Translation core: upstream Z.ai event stream to `OpenAI` chat completions.

pub mod assembler;
pub mod driver;
pub mod fragment;
pub mod phase;
pub mod session;
pub mod sse;
pub mod tool_block;

pub use assembler::{ChunkEncoder, CompletionAggregator, SYSTEM_FINGERPRINT};
pub use driver::{translate_buffered, translate_streaming, SessionTranslator};
pub use fragment::{Emitted, FinishReason, OutputFragment};
pub use session::{Flow, Session};
pub use sse::{parse_upstream_line, LineDecoder, DONE_FRAME};
