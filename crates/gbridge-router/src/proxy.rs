use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::info;

use gbridge_core::{BridgeEngine, FrameStream, Operation, ProxyError};
use gbridge_protocol::gemini::generate_content::request::{
    GenerateContentPath, GenerateContentRequest, GenerateContentRequestBody,
};
use gbridge_protocol::gemini::generate_content::response::GenerateContentResponse;

const SERVICE_NAME: &str = "gbridge";

#[derive(Clone)]
pub struct BridgeState {
    pub engine: Arc<BridgeEngine>,
    pub access_logs: bool,
}

/// Per-request id, attached by the access-log middleware.
#[derive(Debug, Clone)]
pub struct RequestTraceId(pub String);

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
}

pub fn bridge_router(engine: Arc<BridgeEngine>, access_logs: bool) -> Router {
    let state = BridgeState {
        engine,
        access_logs,
    };

    Router::new()
        .route("/health", get(health))
        // generateContent / streamGenerateContent / countTokens
        .route("/v1beta/models/{*name}", post(gemini_post))
        .route("/models/{*name}", post(gemini_post))
        .layer(middleware::from_fn_with_state(state.clone(), access_log))
        .with_state(state)
}

async fn access_log(
    State(state): State<BridgeState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();
    req.extensions_mut()
        .insert(RequestTraceId(trace_id.clone()));

    if !state.access_logs {
        return next.run(req).await;
    }

    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    // For streams the duration ends at the headers; `stream_finished` carries the full elapsed time.
    info!(
        event = "access",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        model = model_from_path(&path).unwrap_or("-"),
        trace = %trace_prefix(&trace_id),
        stream = is_event_stream(&response),
        duration_ms = started.elapsed().as_millis() as u64
    );
    response
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|value| value.as_bytes().starts_with(b"text/event-stream"))
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

async fn gemini_post(
    State(state): State<BridgeState>,
    Extension(trace_id): Extension<RequestTraceId>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, action)) = split_model_action(&model_action) else {
        return error_response(ProxyError::bad_request(
            "expected a path of the form models/{model}:{action}",
        ));
    };
    let Some(operation) = Operation::from_action(action) else {
        return error_response(ProxyError::not_found(format!(
            "unknown action `{action}`"
        )));
    };

    let body: GenerateContentRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return error_response(ProxyError::bad_request(format!(
                "invalid generateContent body: {err}"
            )));
        }
    };
    let request = GenerateContentRequest {
        path: GenerateContentPath {
            model: model.to_string(),
        },
        body,
    };

    let engine = &state.engine;
    match operation {
        Operation::GenerateContent => {
            json_response(engine.generate_content(request, &trace_id.0).await)
        }
        Operation::CountTokens => json_response(engine.count_tokens(request, &trace_id.0).await),
        Operation::StreamGenerateContent => {
            sse_response(engine.stream_generate_content(request, &trace_id.0).await)
        }
    }
}

fn split_model_action(input: &str) -> Option<(&str, &str)> {
    let raw = input.trim().trim_start_matches('/');
    let raw = raw.strip_prefix("models/").unwrap_or(raw);
    let (model, action) = raw.split_once(':')?;
    let model = model.trim();
    let action = action.trim();
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some((model, action))
}

fn model_from_path(path: &str) -> Option<&str> {
    let (_, rest) = path.split_once("models/")?;
    let model = rest.split(':').next()?;
    if model.is_empty() { None } else { Some(model) }
}

fn trace_prefix(trace_id: &str) -> &str {
    trace_id.get(..8).unwrap_or(trace_id)
}

fn json_response(result: Result<GenerateContentResponse, ProxyError>) -> Response {
    match result {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ProxyError) -> Response {
    Response::builder()
        .status(err.status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(err.body))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
        })
}

fn sse_response(frames: FrameStream) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(h) = builder.headers_mut() {
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        // Hint common reverse proxies to avoid buffering SSE responses.
        h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        h.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
    }

    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_model_and_action() {
        assert_eq!(
            split_model_action("gemini-2.5-pro:generateContent"),
            Some(("gemini-2.5-pro", "generateContent"))
        );
        assert_eq!(
            split_model_action("/models/gemini-flash:streamGenerateContent"),
            Some(("gemini-flash", "streamGenerateContent"))
        );
        assert_eq!(split_model_action("gemini-2.5-pro"), None);
        assert_eq!(split_model_action(":generateContent"), None);
    }

    #[test]
    fn access_log_fields() {
        assert_eq!(
            model_from_path("/v1beta/models/gemini-2.5-pro:generateContent"),
            Some("gemini-2.5-pro")
        );
        assert_eq!(model_from_path("/health"), None);
        assert_eq!(trace_prefix("0123456789abcdef"), "01234567");
        assert_eq!(trace_prefix("abc"), "abc");
    }

    #[test]
    fn stream_responses_are_flagged_in_access_log() {
        let frames: FrameStream = Box::pin(futures_util::stream::empty());
        assert!(is_event_stream(&sse_response(frames)));
        assert!(!is_event_stream(&error_response(ProxyError::bad_request("bad"))));
    }
}
