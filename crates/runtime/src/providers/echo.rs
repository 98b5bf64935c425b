//! Offline backend that echoes the resolved input.
//!
//! Useful for dry runs, for testing documents without a model server and as
//! the reference implementation of the [`Backend`] contract.

use crate::backend::{chat_messages, Backend, BackendRequest, DeltaAccumulator, InferenceOptions, ResolvedPrompt};
use aiconfig_core::{AppError, AppResult};
use aiconfig_prompt::{ModelRef, Output, Params, Prompt, PromptInput, StructuredInput};
use serde_json::{json, Map, Value};

pub struct EchoBackend {
    id: String,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::with_id("echo")
    }

    /// Echo backend registered under a different id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for EchoBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn serialize(&self, name: &str, data: &Value, params: &Params) -> AppResult<Vec<Prompt>> {
        let input = match data {
            Value::String(text) => PromptInput::Text(text.clone()),
            Value::Null => {
                return Err(AppError::Serialization(format!(
                    "Cannot serialize empty data for prompt '{}'",
                    name
                )))
            }
            other => PromptInput::Structured(StructuredInput {
                data: other.clone(),
                attachments: None,
                extra: Map::new(),
            }),
        };

        let mut prompt = Prompt::new(name, "");
        prompt.input = input;
        prompt.metadata.model = Some(ModelRef::Name(self.id.clone()));
        prompt.metadata.parameters = params.clone();
        Ok(vec![prompt])
    }

    async fn deserialize(&self, resolved: &ResolvedPrompt) -> AppResult<BackendRequest> {
        Ok(json!({
            "model": &resolved.model,
            "messages": chat_messages(resolved),
            "settings": &resolved.settings,
        }))
    }

    async fn run(
        &self,
        resolved: &ResolvedPrompt,
        _request: BackendRequest,
        options: &InferenceOptions,
    ) -> AppResult<Vec<Output>> {
        let text = resolved.input_text();
        tracing::debug!("Echoing {} chars for '{}'", text.len(), resolved.prompt.name);

        let mut acc = DeltaAccumulator::new(options);
        for word in text.split_inclusive(' ') {
            acc.push(word);
        }
        Ok(vec![Output::execute_result(acc.finish())])
    }
}
