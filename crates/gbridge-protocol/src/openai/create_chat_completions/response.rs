use serde::{Deserialize, Serialize};

use crate::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionResponseMessage, CompletionUsage,
    null_as_default,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatCompletionChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: i64,
    pub message: ChatCompletionResponseMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<ChatCompletionFinishReason>,
}

/// Compatible backends are sloppy about the envelope: `object` is free-form and a `null`
/// `id`/`model`/`created`/`choices` reads as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateChatCompletionResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_fields_are_lenient() {
        let response: CreateChatCompletionResponse = serde_json::from_str(
            r#"{
                "id": null, "object": "chat.completion.chunk", "model": "gpt-4",
                "choices": [{"index": null, "message": {"role": "assistant", "content": "ok",
                    "tool_calls": [{"id": "c", "type": "function",
                        "function": {"name": "f", "arguments": null}}]}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": null, "completion_tokens": 1, "total_tokens": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(response.id, "");
        assert_eq!(response.object.as_deref(), Some("chat.completion.chunk"));
        assert_eq!(response.choices[0].index, 0);
        assert_eq!(response.choices[0].message.content.as_deref(), Some("ok"));
        assert_eq!(response.usage.unwrap().prompt_tokens, 0);
    }
}
