use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures_util::StreamExt;
use serde_json::{Value as JsonValue, json};

use gbridge_core::upstream_client::{
    ChatBackend, UpstreamClientConfig, UpstreamFailure, WreqChatBackend,
};
use gbridge_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody,
};
use gbridge_protocol::openai::create_chat_completions::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
};

const STREAM_BODY: &str = concat!(
    "data: {\"id\":\"c1\",\"model\":\"gpt-4\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    ": keep-alive\n\n",
    "data: {\"id\":\"c1\",\"model\":\"gpt-4\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn chat_completions(headers: HeaderMap, body: String) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some("Bearer sk-test");
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"bad key"}}"#,
        )
            .into_response();
    }

    let request: JsonValue = serde_json::from_str(&body).unwrap_or_default();
    if request["model"] == json!("broken-model") {
        return (StatusCode::OK, "not json").into_response();
    }
    if request["stream"] == json!(true) {
        return Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from(STREAM_BODY))
            .unwrap_or_default();
    }

    axum::Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": request["model"],
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))
    .into_response()
}

async fn spawn_backend() -> String {
    let app = Router::new().route("/v1/chat/completions", post(chat_completions));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn backend(base_url: String, api_key: &str) -> WreqChatBackend {
    WreqChatBackend::new(UpstreamClientConfig {
        base_url,
        api_key: api_key.to_string(),
        proxy: None,
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(10),
        stream_idle_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn request(model: &str, stream: bool) -> CreateChatCompletionRequest {
    CreateChatCompletionRequest {
        body: CreateChatCompletionRequestBody {
            messages: vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: "Hi".to_string(),
                },
            )],
            model: model.to_string(),
            stream: stream.then_some(true),
            stop: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
        },
    }
}

#[tokio::test]
async fn complete_round_trips_through_http() {
    let base_url = spawn_backend().await;
    let response = backend(base_url, "sk-test")
        .complete(request("gpt-4", false))
        .await
        .unwrap();

    assert_eq!(response.model, "gpt-4");
    assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn stream_yields_chunks_until_done() {
    let base_url = spawn_backend().await;
    let chunks: Vec<_> = backend(base_url, "sk-test")
        .stream(request("gpt-4", true))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk.as_ref().ok())
        .filter_map(|chunk| chunk.choices[0].delta.as_ref()?.content.clone())
        .collect();
    assert_eq!(text, "Hello");
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() {
    let base_url = spawn_backend().await;
    let failure = backend(base_url, "sk-wrong")
        .stream(request("gpt-4", true))
        .await
        .err()
        .unwrap();

    match failure {
        UpstreamFailure::Http { status, body } => {
            assert_eq!(status, 401);
            assert!(String::from_utf8_lossy(&body).contains("bad key"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_completion_is_a_decode_failure() {
    let base_url = spawn_backend().await;
    let failure = backend(base_url, "sk-test")
        .complete(request("broken-model", false))
        .await
        .unwrap_err();
    assert!(matches!(failure, UpstreamFailure::Decode { .. }));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_failure() {
    let failure = backend("http://127.0.0.1:1/v1".to_string(), "sk-test")
        .complete(request("gpt-4", false))
        .await
        .unwrap_err();
    assert!(matches!(failure, UpstreamFailure::Transport { .. }));
}
