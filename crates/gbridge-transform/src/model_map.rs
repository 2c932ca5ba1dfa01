use std::collections::HashMap;

use tracing::info;

const MODEL_PREFIX: &str = "models/";

/// Static Gemini model id to chat-completions model id table with a default fallback.
#[derive(Debug, Clone)]
pub struct ModelMap {
    table: HashMap<String, String>,
    default_model: String,
}

impl ModelMap {
    pub fn new(table: HashMap<String, String>, default_model: impl Into<String>) -> Self {
        let table = table
            .into_iter()
            .map(|(gemini, openai)| (strip_model_prefix(&gemini).to_string(), openai))
            .collect();
        Self {
            table,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Never fails; a miss resolves to the default model.
    pub fn resolve(&self, requested: &str) -> &str {
        let key = strip_model_prefix(requested);
        let (resolved, mapped) = match self.table.get(key) {
            Some(model) => (model.as_str(), true),
            None => (self.default_model.as_str(), false),
        };
        info!(
            event = "model_mapped",
            requested = %requested,
            resolved = %resolved,
            mapped
        );
        resolved
    }
}

fn strip_model_prefix(model: &str) -> &str {
    let model = model.trim();
    model.strip_prefix(MODEL_PREFIX).unwrap_or(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> ModelMap {
        let mut table = HashMap::new();
        table.insert("gemini-2.5-pro".to_string(), "gpt-4".to_string());
        table.insert("models/gemini-flash".to_string(), "gpt-4o-mini".to_string());
        ModelMap::new(table, "gpt-3.5-turbo")
    }

    #[test]
    fn resolves_known_models_with_or_without_prefix() {
        let map = map();
        assert_eq!(map.resolve("gemini-2.5-pro"), "gpt-4");
        assert_eq!(map.resolve("models/gemini-2.5-pro"), "gpt-4");
        assert_eq!(map.resolve("gemini-flash"), "gpt-4o-mini");
    }

    #[test]
    fn unmapped_models_fall_back_to_default() {
        let map = map();
        assert_eq!(map.resolve("gemini-unknown"), "gpt-3.5-turbo");
        assert_eq!(map.resolve(""), "gpt-3.5-turbo");
        assert_eq!(map.default_model(), "gpt-3.5-turbo");
    }
}
