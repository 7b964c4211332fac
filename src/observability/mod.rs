use crate::protocol::openai_chat::OpenAiUsage;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(tracing_level) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Filter directive for a config log level; `None` disables logging.
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log the outcome of a finished chat request, computing duration from start time.
pub fn log_request_complete(
    model: &str,
    finish_reason: Option<&str>,
    usage: Option<&OpenAiUsage>,
    start_time: std::time::Instant,
) {
    let elapsed_ms = start_time.elapsed().as_millis();
    let (prompt_tokens, completion_tokens, total_tokens) = usage.map_or((0, 0, 0), |u| {
        (u.prompt_tokens, u.completion_tokens, u.total_tokens)
    });
    info!(
        model,
        finish_reason = finish_reason.unwrap_or("none"),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        elapsed_ms,
        "chat completion finished"
    );
}
