use gbridge_protocol::gemini::generate_content::response::GenerateContentResponse as GeminiGenerateContentResponse;
use gbridge_protocol::gemini::generate_content::types::{
    Candidate, Content as GeminiContent, ContentRole as GeminiContentRole, FinishReason,
    JsonValue, Modality, ModalityTokenCount, Part as GeminiPart, UsageMetadata,
};
use gbridge_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use gbridge_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, CompletionUsage,
};

use crate::error::TransformError;

const FENCE: &str = "```";

/// Convert one complete chat-completions result into a Gemini response.
///
/// Only the first choice is translated. Tool-call arguments that are not valid JSON fail
/// the whole conversion.
pub fn transform_response(
    response: CreateChatCompletionResponse,
) -> Result<GeminiGenerateContentResponse, TransformError> {
    let mut parts = Vec::new();
    let mut finish_reason = FinishReason::Stop;

    if let Some(choice) = response.choices.into_iter().next() {
        let message = choice.message;

        if let Some(content) = message.content
            && !content.is_empty()
        {
            let text = strip_enclosing_fence(&content)
                .map(str::to_string)
                .unwrap_or(content);
            parts.push(GeminiPart::text(text));
        }

        for call in message.tool_calls.unwrap_or_default() {
            let ChatCompletionMessageToolCall::Function { function, .. } = call;
            let args = parse_arguments(&function.name, &function.arguments)?;
            parts.push(GeminiPart::function_call(function.name, args));
        }

        if let Some(call) = message.function_call {
            let args = parse_arguments(&call.name, &call.arguments)?;
            parts.push(GeminiPart::function_call(call.name, args));
        }

        finish_reason = choice
            .finish_reason
            .map(map_finish_reason)
            .unwrap_or(FinishReason::Stop);
    }

    Ok(GeminiGenerateContentResponse {
        candidates: vec![Candidate {
            content: GeminiContent {
                parts,
                role: Some(GeminiContentRole::Model),
            },
            finish_reason: Some(finish_reason),
            index: Some(0),
        }],
        usage_metadata: response.usage.as_ref().map(map_usage),
        model_version: non_empty(response.model),
        response_id: non_empty(response.id),
    })
}

/// Inner text of a body that is exactly one fenced code block, if it is one.
///
/// Any info string is accepted after the opening fence. Prose around the block or a
/// second fence inside it leaves the body untouched.
pub fn strip_enclosing_fence(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let rest = trimmed.strip_prefix(FENCE)?;
    let (info, body) = rest.split_once('\n')?;
    if info.contains('`') {
        return None;
    }
    let inner = body.strip_suffix(FENCE)?;
    let inner = inner.strip_suffix('\n')?;
    let inner = inner.strip_suffix('\r').unwrap_or(inner);
    if inner.contains(FENCE) {
        return None;
    }
    Some(inner)
}

pub(crate) fn map_finish_reason(reason: ChatCompletionFinishReason) -> FinishReason {
    match reason {
        ChatCompletionFinishReason::Length => FinishReason::MaxTokens,
        ChatCompletionFinishReason::ContentFilter => FinishReason::Safety,
        ChatCompletionFinishReason::Stop
        | ChatCompletionFinishReason::ToolCalls
        | ChatCompletionFinishReason::FunctionCall
        | ChatCompletionFinishReason::Other => FinishReason::Stop,
    }
}

pub(crate) fn map_usage(usage: &CompletionUsage) -> UsageMetadata {
    let prompt_tokens = clamp_tokens(usage.prompt_tokens);

    UsageMetadata {
        prompt_token_count: Some(prompt_tokens),
        candidates_token_count: Some(clamp_tokens(usage.completion_tokens)),
        total_token_count: Some(clamp_tokens(usage.total_tokens)),
        prompt_tokens_details: Some(vec![ModalityTokenCount {
            modality: Modality::Text,
            token_count: prompt_tokens,
        }]),
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Result<JsonValue, TransformError> {
    // Some backends send an empty string for calls without parameters.
    if arguments.trim().is_empty() {
        return Ok(JsonValue::Object(Default::default()));
    }
    serde_json::from_str(arguments)
        .map_err(|source| TransformError::argument_decode(name, arguments, source))
}

fn clamp_tokens(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
