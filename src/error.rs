/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl BridgeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            BridgeError::Auth(_) => ErrorCategory::Authentication,
            BridgeError::Config(_)
            | BridgeError::Transport(_)
            | BridgeError::Translation(_)
            | BridgeError::Internal(_) => ErrorCategory::ServerError,
            BridgeError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }
}

impl ErrorCategory {
    fn status(self) -> http::StatusCode {
        match self {
            ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
            ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
            ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
            ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::ServerError | ErrorCategory::Unknown => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// `(type, code)` pair of the `OpenAI` error object.
    fn wire_labels(self) -> (&'static str, &'static str) {
        match self {
            ErrorCategory::InvalidRequest => ("invalid_request_error", "invalid_request"),
            ErrorCategory::Authentication => ("authentication_error", "invalid_api_key"),
            ErrorCategory::Permission => ("permission_error", "permission_denied"),
            ErrorCategory::RateLimit => ("rate_limit_error", "rate_limit_exceeded"),
            ErrorCategory::ServerError | ErrorCategory::Unknown => ("server_error", "server_error"),
        }
    }
}

/// Format an error as an `OpenAI` error body, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &BridgeError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let (kind, code) = cat.wire_labels();
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": kind,
            "code": code,
        }
    });
    (cat.status(), body)
}

impl axum::response::IntoResponse for BridgeError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
