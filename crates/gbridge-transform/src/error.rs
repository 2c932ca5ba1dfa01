#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("tool call `{name}` carried arguments that are not valid JSON: {source}")]
    ArgumentDecode {
        name: String,
        arguments: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool call in slot {slot} (id `{id}`) ended without a function name")]
    MissingToolName {
        slot: i64,
        id: String,
        arguments: String,
    },
}

impl TransformError {
    pub fn argument_decode(
        name: impl Into<String>,
        arguments: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Self::ArgumentDecode {
            name: name.into(),
            arguments: arguments.into(),
            source,
        }
    }
}
