use std::collections::HashMap;

use gbridge_protocol::gemini::generate_content::request::GenerateContentRequest as GeminiGenerateContentRequest;
use gbridge_protocol::gemini::generate_content::types::{
    Content as GeminiContent, GenerationConfig, JsonValue, Tool as GeminiTool,
};
use gbridge_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody, StopConfiguration,
};
use gbridge_protocol::openai::create_chat_completions::types::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCallFunction,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
    ChatCompletionRequestUserMessage, ChatCompletionToolChoiceMode,
    ChatCompletionToolChoiceOption, ChatCompletionToolDefinition, FunctionObject,
};
use tracing::{debug, warn};

use crate::conversation::{Part, Turn, TurnRole, concat_text, conversation_from_contents};

/// Sampling settings renamed 1:1 onto chat-completions fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub top_p: Option<f64>,
    pub stop: Option<StopConfiguration>,
}

/// Convert a Gemini generate-content request into an OpenAI chat-completions request
/// addressed to `model`.
pub fn transform_request(
    request: GeminiGenerateContentRequest,
    model: &str,
    stream: bool,
) -> CreateChatCompletionRequest {
    let body = request.body;
    let mut messages = Vec::new();

    if let Some(system_instruction) = body.system_instruction.as_ref()
        && let Some(message) = map_system_instruction(system_instruction)
    {
        messages.push(message);
    }

    let turns = conversation_from_contents(body.contents);
    messages.extend(convert_contents_to_messages(&turns));

    let params = convert_config_to_params(body.generation_config.as_ref());
    let tools = convert_tools(body.tools);
    let tool_choice = tools
        .as_ref()
        .map(|_| ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::Auto));

    CreateChatCompletionRequest {
        body: CreateChatCompletionRequestBody {
            messages,
            model: model.to_string(),
            stream: stream.then_some(true),
            stop: params.stop,
            max_tokens: params.max_tokens,
            tools,
            tool_choice,
            temperature: params.temperature,
            top_p: params.top_p,
        },
    }
}

pub fn convert_contents_to_messages(turns: &[Turn]) -> Vec<ChatCompletionRequestMessage> {
    let mut messages = Vec::new();
    let mut call_ids = CallIds::default();
    let last_index = turns.len().saturating_sub(1);

    for (index, turn) in turns.iter().enumerate() {
        match turn.role {
            TurnRole::User | TurnRole::Tool => {
                messages.extend(map_user_turn(turn, &mut call_ids));
            }
            TurnRole::Model => {
                call_ids.reset();
                let is_final = index == last_index;
                if let Some(message) =
                    map_model_turn(turn, &turns[index + 1..], is_final, &mut call_ids)
                {
                    messages.push(message);
                }
            }
            TurnRole::Unrecognized => {
                warn!(event = "turn_skipped", index, "unrecognized content role, turn ignored");
            }
        }
    }

    messages
}

pub fn convert_config_to_params(config: Option<&GenerationConfig>) -> GenerationParams {
    let Some(config) = config else {
        return GenerationParams::default();
    };

    GenerationParams {
        temperature: config.temperature,
        max_tokens: config.max_output_tokens.map(i64::from),
        top_p: config.top_p,
        stop: config
            .stop_sequences
            .as_ref()
            .map(|sequences| StopConfiguration::Many(sequences.clone())),
    }
}

/// Flatten every function declaration into one tool list; `None` when there are none.
pub fn convert_tools(tools: Option<Vec<GeminiTool>>) -> Option<Vec<ChatCompletionToolDefinition>> {
    let mut output = Vec::new();
    for tool in tools.unwrap_or_default() {
        for declaration in tool.function_declarations.unwrap_or_default() {
            let parameters = declaration
                .parameters_json_schema
                .or(declaration.parameters);
            output.push(ChatCompletionToolDefinition::Function {
                function: FunctionObject {
                    name: declaration.name,
                    description: if declaration.description.is_empty() {
                        None
                    } else {
                        Some(declaration.description)
                    },
                    parameters,
                },
            });
        }
    }

    if output.is_empty() { None } else { Some(output) }
}

fn map_system_instruction(content: &GeminiContent) -> Option<ChatCompletionRequestMessage> {
    let text = concat_text(content);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(ChatCompletionRequestMessage::System(
        ChatCompletionRequestSystemMessage {
            content: text.to_string(),
        },
    ))
}

fn map_user_turn(turn: &Turn, call_ids: &mut CallIds) -> Vec<ChatCompletionRequestMessage> {
    let mut text = String::new();
    let mut tool_messages = Vec::new();

    for part in &turn.parts {
        match part {
            Part::Text(value) => text.push_str(value),
            Part::FunctionResponse { name, response } => {
                tool_messages.push(ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessage {
                        content: json_string(response),
                        tool_call_id: call_ids.next_response(name),
                    },
                ));
            }
            Part::FunctionCall { .. } => {}
        }
    }

    let mut messages = Vec::with_capacity(tool_messages.len() + 1);
    let text = text.trim();
    if !text.is_empty() {
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: text.to_string(),
            },
        ));
    }
    messages.extend(tool_messages);
    messages
}

fn map_model_turn(
    turn: &Turn,
    later_turns: &[Turn],
    is_final: bool,
    call_ids: &mut CallIds,
) -> Option<ChatCompletionRequestMessage> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in &turn.parts {
        match part {
            Part::Text(value) => text.push_str(value),
            Part::FunctionCall { name, args } => {
                if is_final && !later_turns.iter().any(|turn| turn.has_function_response(name)) {
                    debug!(event = "function_call_dropped", name = %name);
                    continue;
                }
                tool_calls.push(ChatCompletionMessageToolCall::Function {
                    id: call_ids.next_call(name),
                    function: ChatCompletionMessageToolCallFunction {
                        name: name.clone(),
                        arguments: json_string(args),
                    },
                });
            }
            Part::FunctionResponse { .. } => {}
        }
    }

    let text = text.trim();
    if text.is_empty() && tool_calls.is_empty() {
        return None;
    }

    Some(ChatCompletionRequestMessage::Assistant(
        ChatCompletionRequestAssistantMessage {
            content: if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        },
    ))
}

/// Per-name ordinals; the k-th response for a name answers the k-th call of the last model turn.
#[derive(Debug, Default)]
struct CallIds {
    calls: HashMap<String, usize>,
    responses: HashMap<String, usize>,
}

impl CallIds {
    fn reset(&mut self) {
        self.calls.clear();
        self.responses.clear();
    }

    fn next_call(&mut self, name: &str) -> String {
        next_id(&mut self.calls, name)
    }

    fn next_response(&mut self, name: &str) -> String {
        next_id(&mut self.responses, name)
    }
}

fn next_id(counters: &mut HashMap<String, usize>, name: &str) -> String {
    let counter = counters.entry(name.to_string()).or_insert(0);
    let id = format!("{name}:{counter}");
    *counter += 1;
    id
}

fn json_string(value: &JsonValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbridge_protocol::gemini::generate_content::request::{
        GenerateContentPath, GenerateContentRequestBody,
    };
    use serde_json::json;

    fn request(body: JsonValue) -> GeminiGenerateContentRequest {
        GeminiGenerateContentRequest {
            path: GenerateContentPath {
                model: "gemini-2.5-pro".to_string(),
            },
            body: serde_json::from_value::<GenerateContentRequestBody>(body).unwrap(),
        }
    }

    fn messages_json(body: JsonValue) -> JsonValue {
        let request = transform_request(request(body), "gpt-4", false);
        serde_json::to_value(request.body.messages).unwrap()
    }

    #[test]
    fn text_turns_are_concatenated_and_trimmed() {
        let messages = messages_json(json!({
            "systemInstruction": {"parts": [{"text": " be brief "}]},
            "contents": [
                {"role": "user", "parts": [{"text": " Hello"}, {"text": ", world "}]},
                {"role": "model", "parts": [{"text": "Hi!"}]},
                {"role": "user", "parts": [{"text": "   "}]}
            ]
        }));
        assert_eq!(
            messages,
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "Hello, world"},
                {"role": "assistant", "content": "Hi!"}
            ])
        );
    }

    #[test]
    fn final_turn_call_without_response_is_dropped() {
        let messages = messages_json(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "weather?"}]},
                {"role": "model", "parts": [
                    {"text": "checking"},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                ]}
            ]
        }));
        assert_eq!(
            messages,
            json!([
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": "checking"}
            ])
        );
    }

    #[test]
    fn final_turn_with_only_unanswered_calls_produces_no_message() {
        let messages = messages_json(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "weather?"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {}}}]}
            ]
        }));
        assert_eq!(messages, json!([{"role": "user", "content": "weather?"}]));
    }

    #[test]
    fn answered_calls_keep_correlated_ids() {
        let messages = messages_json(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "weather in two cities"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Rome"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "get_weather", "response": {"temp": 20}}},
                    {"functionResponse": {"name": "get_weather", "response": {"temp": 25}}}
                ]}
            ]
        }));
        assert_eq!(
            messages,
            json!([
                {"role": "user", "content": "weather in two cities"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"type": "function", "id": "get_weather:0",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}},
                    {"type": "function", "id": "get_weather:1",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Rome\"}"}}
                ]},
                {"role": "tool", "content": "{\"temp\":20}", "tool_call_id": "get_weather:0"},
                {"role": "tool", "content": "{\"temp\":25}", "tool_call_id": "get_weather:1"}
            ])
        );
    }

    #[test]
    fn unanswered_call_in_earlier_turn_is_kept() {
        let messages = messages_json(json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "ping", "args": {}}}]},
                {"role": "user", "parts": [{"text": "never mind"}]}
            ]
        }));
        assert_eq!(messages[0]["tool_calls"][0]["id"], json!("ping:0"));
        assert_eq!(messages[1], json!({"role": "user", "content": "never mind"}));
    }

    #[test]
    fn unrecognized_roles_are_skipped() {
        let messages = messages_json(json!({
            "contents": [
                {"role": "critic", "parts": [{"text": "ignored"}]},
                {"parts": [{"text": "kept"}]}
            ]
        }));
        assert_eq!(messages, json!([{"role": "user", "content": "kept"}]));
    }

    #[test]
    fn generation_config_is_renamed_without_defaults() {
        let config = GenerationConfig {
            temperature: Some(0.2),
            max_output_tokens: Some(128),
            top_k: Some(40),
            stop_sequences: Some(vec!["END".to_string()]),
            ..GenerationConfig::default()
        };
        assert_eq!(
            convert_config_to_params(Some(&config)),
            GenerationParams {
                temperature: Some(0.2),
                max_tokens: Some(128),
                top_p: None,
                stop: Some(StopConfiguration::Many(vec!["END".to_string()])),
            }
        );
        assert_eq!(convert_config_to_params(None), GenerationParams::default());
    }

    #[test]
    fn tools_are_flattened_and_enable_auto_choice() {
        let request = transform_request(
            request(json!({
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
                "tools": [
                    {"functionDeclarations": [
                        {"name": "a", "description": "first", "parameters": {"type": "object"}}
                    ]},
                    {"functionDeclarations": [{"name": "b"}]}
                ],
                "generationConfig": {"temperature": 0.5, "topK": 3}
            })),
            "gpt-4",
            true,
        );
        let body = serde_json::to_value(&request.body).unwrap();
        assert_eq!(body["model"], json!("gpt-4"));
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["tool_choice"], json!("auto"));
        assert_eq!(body["temperature"], json!(0.5));
        assert_eq!(
            body["tools"],
            json!([
                {"type": "function", "function": {"name": "a", "description": "first", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "b"}}
            ])
        );
    }

    #[test]
    fn no_declarations_means_no_tools() {
        assert!(convert_tools(Some(vec![GeminiTool::default()])).is_none());
        assert!(convert_tools(None).is_none());
    }
}
