use std::time::{SystemTime, UNIX_EPOCH};

const UPSTREAM_ERROR_MAX_LEN: usize = 500;

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[inline]
pub(crate) fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
fn truncate_on_char_boundary(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Reduce an upstream error body to a short message safe to hand to clients.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
            .or_else(|| json.get("detail").and_then(|m| m.as_str()))
            .or_else(|| json.get("message").and_then(|m| m.as_str()));
        if let Some(msg) = message {
            return truncate_on_char_boundary(msg, UPSTREAM_ERROR_MAX_LEN);
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "upstream returned an empty error body".to_string();
    }
    truncate_on_char_boundary(text, UPSTREAM_ERROR_MAX_LEN)
}
