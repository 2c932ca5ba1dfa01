use std::collections::BTreeMap;

use gbridge_protocol::gemini::generate_content::response::GenerateContentResponse;
use gbridge_protocol::gemini::generate_content::types::{
    Candidate, Content as GeminiContent, ContentRole as GeminiContentRole, FinishReason,
    JsonValue, Part as GeminiPart, UsageMetadata,
};
use gbridge_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;

use super::response::{map_finish_reason, map_usage};
use crate::error::TransformError;

/// Slot used for legacy `function_call` deltas, which carry no index.
const LEGACY_FUNCTION_CALL_SLOT: i64 = -1;

#[derive(Debug, Clone, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// What is left when the backend stream ends.
#[derive(Debug, Default)]
pub struct StreamFlush {
    pub responses: Vec<GenerateContentResponse>,
    pub errors: Vec<TransformError>,
}

/// Per-stream state turning chat-completion chunks into Gemini stream chunks.
///
/// Text is passed through as it arrives. Tool calls are buffered per slot until their
/// arguments parse as JSON and are then emitted once, whole.
#[derive(Debug, Clone, Default)]
pub struct OpenAIChatCompletionToGeminiStreamState {
    response_id: Option<String>,
    model_version: Option<String>,
    pending: BTreeMap<i64, PendingToolCall>,
}

impl OpenAIChatCompletionToGeminiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the state; returns the Gemini chunk it produces, if any.
    pub fn transform_event(
        &mut self,
        chunk: CreateChatCompletionStreamResponse,
    ) -> Option<GenerateContentResponse> {
        self.update_from_chunk(&chunk);
        let usage = chunk.usage.as_ref().map(map_usage);
        let choice = chunk.choices.into_iter().next()?;

        let mut parts = Vec::new();
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content
                && !text.is_empty()
            {
                parts.push(GeminiPart::text(text));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                if let Some(part) =
                    self.merge_fragment(call.index, call.id, function.name, function.arguments)
                {
                    parts.push(part);
                }
            }

            if let Some(call) = delta.function_call
                && let Some(part) =
                    self.merge_fragment(LEGACY_FUNCTION_CALL_SLOT, None, call.name, call.arguments)
            {
                parts.push(part);
            }
        }

        let finish_reason = choice.finish_reason.map(map_finish_reason);
        if parts.is_empty() && finish_reason.is_none() {
            return None;
        }

        Some(self.build_response(parts, finish_reason, usage))
    }

    /// Flush every call still buffered, in slot order. Consumes the state.
    pub fn finish(mut self) -> StreamFlush {
        let mut flush = StreamFlush::default();

        for (slot, call) in std::mem::take(&mut self.pending) {
            if call.arguments.is_empty() {
                continue;
            }
            if call.name.is_empty() {
                flush.errors.push(TransformError::MissingToolName {
                    slot,
                    id: call.id,
                    arguments: call.arguments,
                });
                continue;
            }
            match serde_json::from_str::<JsonValue>(&call.arguments) {
                Ok(args) => flush.responses.push(self.build_response(
                    vec![GeminiPart::function_call(call.name, args)],
                    Some(FinishReason::Stop),
                    None,
                )),
                Err(source) => flush.errors.push(TransformError::argument_decode(
                    call.name,
                    call.arguments,
                    source,
                )),
            }
        }

        flush
    }

    /// Number of tool calls still waiting for complete arguments.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn merge_fragment(
        &mut self,
        slot: i64,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Option<GeminiPart> {
        let pending = self.pending.entry(slot).or_default();

        if pending.id.is_empty()
            && let Some(id) = id
        {
            pending.id = id;
        }
        if pending.name.is_empty()
            && let Some(name) = name
        {
            pending.name = name;
        }
        if let Some(fragment) = arguments {
            pending.arguments.push_str(&fragment);
        }

        if pending.name.is_empty() || pending.arguments.is_empty() {
            return None;
        }
        let args = serde_json::from_str::<JsonValue>(&pending.arguments).ok()?;
        let finished = self.pending.remove(&slot)?;
        Some(GeminiPart::function_call(finished.name, args))
    }

    fn build_response(
        &self,
        parts: Vec<GeminiPart>,
        finish_reason: Option<FinishReason>,
        usage: Option<UsageMetadata>,
    ) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: GeminiContent {
                    parts,
                    role: Some(GeminiContentRole::Model),
                },
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: usage,
            model_version: self.model_version.clone(),
            response_id: self.response_id.clone(),
        }
    }

    fn update_from_chunk(&mut self, chunk: &CreateChatCompletionStreamResponse) {
        if !chunk.id.is_empty() {
            self.response_id = Some(chunk.id.clone());
        }
        if !chunk.model.is_empty() {
            self.model_version = Some(chunk.model.clone());
        }
    }
}
