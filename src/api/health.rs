use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "zai-bridge is running",
        "config": {
            "upstream": {
                "base_url": config.upstream.base_url,
                "chat_path": config.upstream.chat_path,
                "static_token": config.upstream.token.is_some(),
                "fe_version": config.upstream.fe_version,
            },
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "features": {
                "log_level": config.features.log_level,
            }
        }
    }))
}
