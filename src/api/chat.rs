//! `POST /v1/chat/completions`: forward to the upstream and translate its reply.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};

use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::protocol::zai::encoder::{build_upstream_headers, encode_zai_request};
use crate::protocol::zai::response_decoder::decode_zai_json_completion;
use crate::protocol::zai::UpstreamBodyKind;
use crate::state::AppState;
use crate::stream::{translate_buffered, translate_streaming};
use crate::util::{sanitize_upstream_error, unix_now_secs};

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match handler_inner(state, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "chat completion failed");
            err.into_response()
        }
    }
}

fn parse_chat_request(body: &bytes::Bytes) -> Result<OpenAiChatRequest, BridgeError> {
    let request: OpenAiChatRequest = serde_json::from_slice(body).map_err(|e| {
        BridgeError::InvalidRequest(format!("Invalid OpenAI Chat request body: {e}"))
    })?;
    if request.model.trim().is_empty() {
        return Err(BridgeError::InvalidRequest(
            "Field 'model' must not be empty".to_string(),
        ));
    }
    Ok(request)
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, BridgeError> {
    let started = Instant::now();
    state.authenticate(&headers)?;
    let request = parse_chat_request(&body)?;
    let model = request.model.clone();
    let wants_stream = request.is_stream();

    let token = state.transport.resolve_token().await;
    let upstream_headers = build_upstream_headers(&state.config.upstream, &token)?;
    let upstream_body = encode_zai_request(request, &state.config.upstream, chrono::Utc::now());
    let payload = serde_json::to_vec(&upstream_body)
        .map_err(|e| BridgeError::Internal(format!("Failed to encode upstream body: {e}")))?;

    tracing::debug!(model, stream = wants_stream, "forwarding chat completion upstream");
    let response = state
        .transport
        .send_chat(upstream_headers, bytes::Bytes::from(payload))
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(BridgeError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&body),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match UpstreamBodyKind::from_content_type(&content_type) {
        UpstreamBodyKind::Json => {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| BridgeError::Transport(format!("Upstream read failed: {e}")))?;
            let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                BridgeError::Translation(format!("Invalid upstream JSON completion: {e}"))
            })?;
            let completion = decode_zai_json_completion(&value, unix_now_secs());
            log_request_complete(
                &completion.model,
                completion
                    .choices
                    .first()
                    .and_then(|choice| choice.finish_reason.as_deref()),
                Some(&completion.usage),
                started,
            );
            Ok((status, Json(completion)).into_response())
        }
        UpstreamBodyKind::EventStream if wants_stream => {
            let frames = translate_streaming(response.bytes_stream(), &model);
            Ok(sse_ok_response(Body::from_stream(frames)))
        }
        UpstreamBodyKind::EventStream => {
            let completion = translate_buffered(response.bytes_stream(), &model).await?;
            Ok(Json(completion).into_response())
        }
        UpstreamBodyKind::Other => Ok(passthrough_response(status, &content_type, response)),
    }
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// Relay a body the translator does not understand as-is.
fn passthrough_response(
    status: StatusCode,
    content_type: &str,
    upstream: reqwest::Response,
) -> Response {
    let body = Body::from_stream(upstream.bytes_stream().map(|chunk| {
        chunk.map_err(|e| BridgeError::Transport(format!("Upstream read failed: {e}")))
    }));
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        if !content_type.is_empty() {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
    }
    response
}
