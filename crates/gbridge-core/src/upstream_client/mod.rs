use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};
use serde_json::Value as JsonValue;
use tracing::warn;
use wreq::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use wreq::{Client, Method, Proxy};

use gbridge_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;
use gbridge_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use gbridge_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use gbridge_protocol::sse::{SseEvent, SseParser};

use crate::config::BridgeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamFailure {
    /// No HTTP response (or the body could not be read).
    #[error("upstream transport error ({kind:?}): {message}")]
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// Non-2xx response, body captured as bytes.
    #[error("upstream returned HTTP {status}")]
    Http { status: u16, body: Bytes },
    #[error("upstream payload could not be decoded: {message}")]
    Decode { message: String },
    /// Error object sent in-band on an already open stream.
    #[error("upstream stream failed: {message}")]
    Stream { message: String },
}

pub type ChunkStream = Pin<
    Box<dyn Stream<Item = Result<CreateChatCompletionStreamResponse, UpstreamFailure>> + Send>,
>;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UpstreamFailure>> + Send + 'a>>;

/// Chat-completions backend. One-shot and streaming calls are separate operations.
pub trait ChatBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: CreateChatCompletionRequest,
    ) -> BackendFuture<'a, CreateChatCompletionResponse>;

    /// Resolves once the backend accepted the stream; chunks follow in arrival order.
    fn stream<'a>(&'a self, request: CreateChatCompletionRequest) -> BackendFuture<'a, ChunkStream>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            proxy: config.upstream.proxy.clone(),
            connect_timeout: config.upstream.connect_timeout(),
            request_timeout: config.upstream.request_timeout(),
            stream_idle_timeout: config.upstream.stream_idle_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct WreqChatBackend {
    client: Client,
    config: UpstreamClientConfig,
}

impl WreqChatBackend {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config, normalize_proxy(config.proxy.clone()).as_deref())?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim().trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        request: &CreateChatCompletionRequest,
        stream: bool,
    ) -> Result<wreq::Response, UpstreamFailure> {
        let body = serde_json::to_vec(&request.body).map_err(|err| UpstreamFailure::Decode {
            message: format!("request encode failed: {err}"),
        })?;

        let mut builder = self
            .client
            .request(Method::POST, &self.endpoint())
            .header(CONTENT_TYPE, "application/json");
        if !self.config.api_key.is_empty() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", self.config.api_key));
        }
        if stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        builder.body(body).send().await.map_err(map_wreq_error)
    }
}

impl ChatBackend for WreqChatBackend {
    fn complete<'a>(
        &'a self,
        request: CreateChatCompletionRequest,
    ) -> BackendFuture<'a, CreateChatCompletionResponse> {
        Box::pin(async move {
            let resp = self.send(&request, false).await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await.map_err(map_wreq_error)?;
            if !(200..300).contains(&status) {
                return Err(UpstreamFailure::Http { status, body });
            }
            serde_json::from_slice(&body).map_err(|err| UpstreamFailure::Decode {
                message: err.to_string(),
            })
        })
    }

    fn stream<'a>(&'a self, request: CreateChatCompletionRequest) -> BackendFuture<'a, ChunkStream> {
        Box::pin(async move {
            let resp = self.send(&request, true).await?;
            let status = resp.status().as_u16();
            if !(200..300).contains(&status) {
                let body = resp.bytes().await.map_err(map_wreq_error)?;
                return Err(UpstreamFailure::Http { status, body });
            }
            let bytes = resp.bytes_stream().map(|item| item.map_err(map_wreq_error));
            Ok(decode_chunk_stream(bytes, self.config.stream_idle_timeout))
        })
    }
}

/// Decode an SSE byte stream into chat-completion chunks.
///
/// Ends at `[DONE]` or when the body ends. Frames that are not chunks are skipped. An idle
/// gap longer than `idle_timeout`, a transport error or an in-band error object ends the
/// stream with one `Err`.
pub fn decode_chunk_stream<S>(bytes: S, idle_timeout: Duration) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, UpstreamFailure>> + Send + 'static,
{
    let stream = unfold(
        (
            Box::pin(bytes),
            SseParser::new(),
            VecDeque::<Result<CreateChatCompletionStreamResponse, UpstreamFailure>>::new(),
            false,
        ),
        move |(mut upstream, mut parser, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (upstream, parser, pending, done)));
                }
                if done {
                    return None;
                }
                match tokio::time::timeout(idle_timeout, upstream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        done = decode_events(parser.push_bytes(&chunk), &mut pending);
                    }
                    Ok(Some(Err(failure))) => {
                        pending.push_back(Err(failure));
                        done = true;
                    }
                    Ok(None) => {
                        decode_events(parser.finish(), &mut pending);
                        done = true;
                    }
                    Err(_) => {
                        pending.push_back(Err(UpstreamFailure::Transport {
                            kind: UpstreamTransportErrorKind::ReadTimeout,
                            message: format!(
                                "no data from upstream for {}s",
                                idle_timeout.as_secs()
                            ),
                        }));
                        done = true;
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

/// Returns true once the stream is over (`[DONE]` or an in-band error).
fn decode_events(
    events: Vec<SseEvent>,
    pending: &mut VecDeque<Result<CreateChatCompletionStreamResponse, UpstreamFailure>>,
) -> bool {
    for sse in events {
        if sse.is_done() {
            return true;
        }
        if sse.data.trim().is_empty() {
            continue;
        }
        let value = match serde_json::from_str::<JsonValue>(&sse.data) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "upstream_frame_skipped", error = %err, "stream frame is not JSON");
                continue;
            }
        };
        if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
            let message = error
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            pending.push_back(Err(UpstreamFailure::Stream { message }));
            return true;
        }
        match serde_json::from_value::<CreateChatCompletionStreamResponse>(value) {
            Ok(chunk) => pending.push_back(Ok(chunk)),
            Err(err) => {
                warn!(event = "upstream_frame_skipped", error = %err, "stream frame is not a chunk");
            }
        }
    }
    false
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let kind = classify_wreq_error(&err);
    UpstreamFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return UpstreamTransportErrorKind::ReadTimeout;
        }
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return UpstreamTransportErrorKind::Tls;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Bytes, UpstreamFailure>> + Send + 'static {
        stream::iter(parts.into_iter().map(|part| Ok(Bytes::from_static(part.as_bytes()))))
    }

    async fn collect(
        stream: ChunkStream,
    ) -> Vec<Result<CreateChatCompletionStreamResponse, UpstreamFailure>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn decodes_frames_split_across_reads_and_stops_at_done() {
        let items = collect(decode_chunk_stream(
            byte_stream(vec![
                "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"He",
                "llo\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"id\":\"after-done\",\"choices\":[]}\n\n",
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(items.len(), 1);
        let chunk = items[0].as_ref().unwrap();
        assert_eq!(chunk.id, "c1");
        assert_eq!(
            chunk.choices[0].delta.as_ref().unwrap().content.as_deref(),
            Some("Hello")
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let items = collect(decode_chunk_stream(
            byte_stream(vec![
                ": keep-alive\n\n",
                "data: not-json\n\n",
                "data: {\"choices\":\"wrong\"}\n\n",
                "data: {\"id\":\"ok\",\"choices\":[]}\n\n",
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().id, "ok");
    }

    #[tokio::test]
    async fn in_band_error_ends_the_stream() {
        let items = collect(decode_chunk_stream(
            byte_stream(vec![
                "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
                "data: {\"id\":\"never\",\"choices\":[]}\n\n",
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Err(UpstreamFailure::Stream { message }) if message == "overloaded"
        ));
    }

    #[tokio::test]
    async fn null_error_field_is_an_ordinary_chunk() {
        let items = collect(decode_chunk_stream(
            byte_stream(vec![
                "data: {\"error\":null,\"object\":\"chat.completion\",\"choices\":[{\"index\":null,\"delta\":{\"content\":\"hi\",\"tool_calls\":[{\"index\":null,\"function\":{\"name\":\"f\",\"arguments\":\"{}\"}}]}}]}\n\n",
                "data: {\"error\":null,\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        let delta = first.choices[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("hi"));
        assert_eq!(delta.tool_calls.as_ref().unwrap()[0].index, 0);
        assert!(items[1].is_ok());
    }

    #[tokio::test]
    async fn idle_upstream_times_out() {
        let upstream = byte_stream(vec!["data: {\"id\":\"first\",\"choices\":[]}\n\n"])
            .chain(stream::pending());
        let items = collect(decode_chunk_stream(upstream, Duration::from_millis(20))).await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            &items[1],
            Err(UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::ReadTimeout,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unterminated_last_frame_is_flushed() {
        let items = collect(decode_chunk_stream(
            byte_stream(vec!["data: {\"id\":\"tail\",\"choices\":[]}"]),
            Duration::from_secs(5),
        ))
        .await;
        assert_eq!(items[0].as_ref().unwrap().id, "tail");
    }

    #[test]
    fn endpoint_joins_base_url() {
        let backend = WreqChatBackend::new(UpstreamClientConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: String::new(),
            proxy: Some("  ".to_string()),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            stream_idle_timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(backend.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
