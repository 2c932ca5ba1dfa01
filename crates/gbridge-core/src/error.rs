use bytes::Bytes;
use http::StatusCode;
use serde_json::Value as JsonValue;

use gbridge_protocol::gemini::error::ErrorResponse;
use gbridge_protocol::sse::data_frame;
use gbridge_transform::TransformError;

use crate::upstream_client::UpstreamFailure;

/// Failure handed to the HTTP layer: a status plus a Gemini-shaped JSON error body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: error_body(status.as_u16(), message),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// Backend status is passed through; transport and decode faults become 502.
    pub fn from_upstream(failure: &UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::Http { status, body } => {
                let status = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|status| status.is_client_error() || status.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                Self::new(status, upstream_message(body))
            }
            UpstreamFailure::Transport { .. }
            | UpstreamFailure::Decode { .. }
            | UpstreamFailure::Stream { .. } => Self::bad_gateway(failure.to_string()),
        }
    }

    pub fn from_transform(error: &TransformError) -> Self {
        Self::bad_gateway(error.to_string())
    }

    /// The error body as the one SSE frame that ends a failed stream.
    pub fn sse_frame(&self) -> Bytes {
        data_frame(&String::from_utf8_lossy(&self.body))
    }
}

/// Serialized `{"error": {"code", "message", "status"}}` body.
pub fn error_body(code: u16, message: impl Into<String>) -> Bytes {
    let payload = ErrorResponse::new(code, message);
    match serde_json::to_vec(&payload) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => Bytes::from_static(b"{\"error\":{\"code\":500,\"message\":\"internal error\",\"status\":\"INTERNAL\"}}"),
    }
}

/// Best-effort human message from a backend error body (`{"error":{"message":..}}` or raw text).
pub fn upstream_message(body: &Bytes) -> String {
    if let Ok(value) = serde_json::from_slice::<JsonValue>(body) {
        let message = value
            .get("error")
            .and_then(|error| error.get("message").or(Some(error)))
            .and_then(JsonValue::as_str)
            .or_else(|| value.get("message").and_then(JsonValue::as_str));
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "upstream returned an empty error body".to_string()
    } else {
        text.to_string()
    }
}
