use gbridge_protocol::gemini::generate_content::types::{
    Content as GeminiContent, ContentRole as GeminiContentRole, JsonValue, Part as GeminiPart,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
    /// Function-response turns (`tool`, or the legacy `function`).
    Tool,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall { name: String, args: JsonValue },
    FunctionResponse { name: String, response: JsonValue },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn has_function_response(&self, name: &str) -> bool {
        self.parts.iter().any(|part| {
            matches!(part, Part::FunctionResponse { name: response_name, .. } if response_name == name)
        })
    }
}

impl From<GeminiContent> for Turn {
    fn from(content: GeminiContent) -> Self {
        let role = match content.role {
            None | Some(GeminiContentRole::User) => TurnRole::User,
            Some(GeminiContentRole::Model) => TurnRole::Model,
            Some(GeminiContentRole::Tool | GeminiContentRole::Function) => TurnRole::Tool,
            Some(GeminiContentRole::Unknown) => TurnRole::Unrecognized,
        };

        let mut parts = Vec::new();
        for part in content.parts {
            push_wire_part(part, &mut parts);
        }

        Turn { role, parts }
    }
}

pub fn conversation_from_contents(contents: Vec<GeminiContent>) -> Vec<Turn> {
    contents.into_iter().map(Turn::from).collect()
}

/// Concatenated text of a content, ignoring every other part kind.
pub fn concat_text(content: &GeminiContent) -> String {
    content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect()
}

fn push_wire_part(part: GeminiPart, parts: &mut Vec<Part>) {
    if let Some(text) = part.text {
        parts.push(Part::Text(text));
    }
    if let Some(call) = part.function_call {
        parts.push(Part::FunctionCall {
            name: call.name,
            args: call
                .args
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
        });
    }
    if let Some(response) = part.function_response {
        parts.push(Part::FunctionResponse {
            name: response.name,
            response: response.response,
        });
    }
}
