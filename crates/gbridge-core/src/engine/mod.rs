use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{self, unfold};
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};

use gbridge_protocol::gemini::generate_content::request::GenerateContentRequest;
use gbridge_protocol::gemini::generate_content::response::GenerateContentResponse;
use gbridge_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;
use gbridge_protocol::sse::data_frame;
use gbridge_transform::ModelMap;
use gbridge_transform::generate_content::gemini2openai_chat_completions::{
    OpenAIChatCompletionToGeminiStreamState, transform_request, transform_response,
};

use crate::error::ProxyError;
use crate::upstream_client::{ChatBackend, ChunkStream};

mod exchange;


use exchange::ExchangeLog;

/// Outbound SSE frames, `data: <json>\n\n` each.
pub type FrameStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GenerateContent,
    StreamGenerateContent,
    /// Served by a full generation; there is no real token counter.
    CountTokens,
}

impl Operation {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "generateContent" => Some(Self::GenerateContent),
            "streamGenerateContent" => Some(Self::StreamGenerateContent),
            "countTokens" => Some(Self::CountTokens),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateContent => "generateContent",
            Self::StreamGenerateContent => "streamGenerateContent",
            Self::CountTokens => "countTokens",
        }
    }
}

/// Serves the Gemini operations from a chat-completions backend.
#[derive(Clone)]
pub struct BridgeEngine {
    backend: Arc<dyn ChatBackend>,
    models: Arc<ModelMap>,
    detailed_logs: bool,
}

impl BridgeEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, models: ModelMap, detailed_logs: bool) -> Self {
        Self {
            backend,
            models: Arc::new(models),
            detailed_logs,
        }
    }

    pub async fn generate_content(
        &self,
        request: GenerateContentRequest,
        trace_id: &str,
    ) -> Result<GenerateContentResponse, ProxyError> {
        self.generate_once(Operation::GenerateContent, request, trace_id)
            .await
    }

    /// Same as [`Self::generate_content`]: the backend has no token counting endpoint.
    pub async fn count_tokens(
        &self,
        request: GenerateContentRequest,
        trace_id: &str,
    ) -> Result<GenerateContentResponse, ProxyError> {
        self.generate_once(Operation::CountTokens, request, trace_id)
            .await
    }

    /// Never fails up front: a failure becomes one error frame and the stream ends.
    pub async fn stream_generate_content(
        &self,
        request: GenerateContentRequest,
        trace_id: &str,
    ) -> FrameStream {
        let exchange = ExchangeLog::new(trace_id, self.detailed_logs);
        let upstream_request =
            self.prepare(Operation::StreamGenerateContent, request, &exchange, true);

        let chunks = match self.backend.stream(upstream_request).await {
            Ok(chunks) => chunks,
            Err(failure) => {
                warn!(
                    event = "upstream_failed",
                    trace_id = %trace_id,
                    operation = Operation::StreamGenerateContent.as_str(),
                    error = %failure
                );
                let frame = ProxyError::from_upstream(&failure).sse_frame();
                return Box::pin(stream::once(async move { frame }));
            }
        };

        let pipeline = StreamPipeline::new(chunks, exchange);
        Box::pin(unfold(pipeline, |mut pipeline| async move {
            let frame = pipeline.next_frame().await?;
            Some((frame, pipeline))
        }))
    }

    async fn generate_once(
        &self,
        operation: Operation,
        request: GenerateContentRequest,
        trace_id: &str,
    ) -> Result<GenerateContentResponse, ProxyError> {
        let exchange = ExchangeLog::new(trace_id, self.detailed_logs);
        let upstream_request = self.prepare(operation, request, &exchange, false);

        let response = self
            .backend
            .complete(upstream_request)
            .await
            .map_err(|failure| {
                warn!(
                    event = "upstream_failed",
                    trace_id = %trace_id,
                    operation = operation.as_str(),
                    error = %failure
                );
                ProxyError::from_upstream(&failure)
            })?;
        exchange.record("openai_response", &response);

        let response = transform_response(response).map_err(|err| {
            warn!(
                event = "transform_failed",
                trace_id = %trace_id,
                operation = operation.as_str(),
                error = %err
            );
            ProxyError::from_transform(&err)
        })?;
        exchange.record("gemini_response", &response);
        Ok(response)
    }

    fn prepare(
        &self,
        operation: Operation,
        request: GenerateContentRequest,
        exchange: &ExchangeLog,
        stream: bool,
    ) -> CreateChatCompletionRequest {
        let requested = request.requested_model().to_string();
        let model = self.models.resolve(&requested);
        info!(
            event = "downstream_received",
            trace_id = %exchange.trace_id(),
            operation = operation.as_str(),
            requested_model = %requested,
            model = %model,
            contents = request.body.contents.len()
        );
        exchange.record("gemini_request", &request.body);

        let upstream_request = transform_request(request, model, stream);
        exchange.record("openai_request", &upstream_request.body);
        upstream_request
    }
}

/// Owned state of one in-flight stream. Dropping it drops the backend response.
struct StreamPipeline {
    chunks: ChunkStream,
    state: Option<OpenAIChatCompletionToGeminiStreamState>,
    pending: VecDeque<Bytes>,
    exchange: ExchangeLog,
    chunks_in: usize,
    frames_out: usize,
    started: Instant,
}

impl StreamPipeline {
    fn new(chunks: ChunkStream, exchange: ExchangeLog) -> Self {
        Self {
            chunks,
            state: Some(OpenAIChatCompletionToGeminiStreamState::new()),
            pending: VecDeque::new(),
            exchange,
            chunks_in: 0,
            frames_out: 0,
            started: Instant::now(),
        }
    }

    async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.state.is_none() {
                return None;
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => {
                    self.chunks_in += 1;
                    self.exchange.stream_chunk(self.chunks_in, &chunk);
                    let response = self
                        .state
                        .as_mut()
                        .and_then(|state| state.transform_event(chunk));
                    if let Some(response) = response {
                        self.push_response(&response);
                    }
                }
                Some(Err(failure)) => {
                    self.state = None;
                    warn!(
                        event = "upstream_failed",
                        trace_id = %self.exchange.trace_id(),
                        operation = Operation::StreamGenerateContent.as_str(),
                        error = %failure
                    );
                    self.pending
                        .push_back(ProxyError::from_upstream(&failure).sse_frame());
                    self.frames_out += 1;
                    self.finished("upstream_error");
                }
                None => {
                    if let Some(state) = self.state.take() {
                        let flush = state.finish();
                        for error in flush.errors {
                            warn!(
                                event = "tool_call_discarded",
                                trace_id = %self.exchange.trace_id(),
                                error = %error
                            );
                        }
                        for response in flush.responses {
                            self.push_response(&response);
                        }
                    }
                    self.finished("completed");
                }
            }
        }
    }

    fn push_response(&mut self, response: &GenerateContentResponse) {
        match serde_json::to_string(response) {
            Ok(payload) => {
                self.pending.push_back(data_frame(&payload));
                self.frames_out += 1;
            }
            Err(err) => warn!(
                event = "frame_dropped",
                trace_id = %self.exchange.trace_id(),
                error = %err
            ),
        }
    }

    fn finished(&self, outcome: &str) {
        info!(
            event = "stream_finished",
            trace_id = %self.exchange.trace_id(),
            outcome,
            chunks_in = self.chunks_in,
            frames_out = self.frames_out,
            elapsed_ms = self.started.elapsed().as_millis() as u64
        );
        self.exchange
            .stream_summary(self.chunks_in, self.frames_out, outcome);
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        if self.state.is_some() {
            self.finished("cancelled");
        }
    }
}
