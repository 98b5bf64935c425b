//! Ollama backend.
//!
//! Talks to a local Ollama server through its chat endpoint.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::backend::{chat_messages, Backend, BackendRequest, ChatMessage, DeltaAccumulator, InferenceOptions, ResolvedPrompt};
use aiconfig_core::config::DEFAULT_OLLAMA_ENDPOINT;
use aiconfig_core::{AppError, AppResult};
use aiconfig_prompt::{ModelRef, Output, Params, Prompt};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Settings keys consumed by the engine rather than forwarded as options.
const RESERVED_SETTINGS: &[&str] = &["model", "system_prompt", "stream"];

/// Ollama chat request format.
#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

/// Ollama chat response format; one object per line when streaming.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Splits a byte stream into newline-delimited records.
///
/// Network chunks do not align with lines, so partial lines are buffered
/// until their terminator arrives.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

fn parse_chunk(line: &str) -> AppResult<OllamaChatResponse> {
    let chunk: OllamaChatResponse = serde_json::from_str(line)
        .map_err(|e| AppError::Backend(format!("Failed to parse Ollama chunk: {}", e)))?;
    if let Some(error) = &chunk.error {
        return Err(AppError::Backend(format!("Ollama error: {}", error)));
    }
    Ok(chunk)
}

/// Ollama backend.
pub struct OllamaBackend {
    /// Base URL for the Ollama API
    endpoint: String,

    client: reqwest::Client,
}

impl OllamaBackend {
    /// Backend pointing at the default local endpoint.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_OLLAMA_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn chat_request(&self, resolved: &ResolvedPrompt) -> OllamaChatRequest {
        let model = resolved
            .settings
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&resolved.model)
            .to_string();

        let options = resolved
            .settings
            .iter()
            .filter(|(key, _)| !RESERVED_SETTINGS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        OllamaChatRequest {
            model,
            messages: chat_messages(resolved),
            stream: false,
            options,
        }
    }

    async fn post(&self, request: &OllamaChatRequest) -> AppResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.endpoint);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("Failed to send request to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Backend(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }
        Ok(response)
    }

    async fn stream_response(
        &self,
        response: reqwest::Response,
        acc: &mut DeltaAccumulator,
    ) -> AppResult<()> {
        let mut lines = LineBuffer::default();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| AppError::Backend(format!("Stream error: {}", e)))?;
            for line in lines.push(&bytes) {
                let chunk = parse_chunk(&line)?;
                if let Some(message) = chunk.message {
                    acc.push(&message.content);
                }
                if chunk.done {
                    return Ok(());
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(message) = parse_chunk(&line)?.message {
                acc.push(&message.content);
            }
        }
        Ok(())
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for OllamaBackend {
    fn id(&self) -> &str {
        "ollama"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Convert an Ollama chat payload into prompts.
    ///
    /// Each user message becomes one prompt; an assistant reply that follows
    /// it becomes that prompt's output. A conversation of more than one turn
    /// yields prompts named `<name>_1`, `<name>_2`, ... that remember chat
    /// context.
    async fn serialize(&self, name: &str, data: &Value, params: &Params) -> AppResult<Vec<Prompt>> {
        if let Value::String(text) = data {
            let mut prompt = Prompt::new(name, text.as_str()).with_model(self.id());
            prompt.metadata.parameters = params.clone();
            return Ok(vec![prompt]);
        }

        let request: OllamaChatRequest = serde_json::from_value(json!({
            "model": data.get("model").cloned().unwrap_or_else(|| json!(self.id())),
            "messages": data.get("messages").cloned().unwrap_or(Value::Null),
            "stream": false,
            "options": data.get("options").cloned().unwrap_or_else(|| json!({})),
        }))
        .map_err(|e| AppError::Serialization(format!("Invalid Ollama chat payload: {}", e)))?;

        let mut system = None;
        let mut turns: Vec<(String, Option<String>)> = Vec::new();
        for message in request.messages {
            match message.role.as_str() {
                "system" => system = Some(message.content),
                "user" => turns.push((message.content, None)),
                "assistant" => match turns.last_mut() {
                    Some((_, reply @ None)) => *reply = Some(message.content),
                    _ => tracing::warn!("Skipping assistant message without a preceding user turn"),
                },
                other => tracing::warn!("Skipping message with unsupported role '{}'", other),
            }
        }

        if turns.is_empty() {
            return Err(AppError::Serialization(format!(
                "Ollama chat payload for '{}' has no user messages",
                name
            )));
        }

        let multi_turn = turns.len() > 1;
        let settings = (!request.options.is_empty()).then_some(request.options);
        let prompts = turns
            .into_iter()
            .enumerate()
            .map(|(i, (input, reply))| {
                let prompt_name = if multi_turn {
                    format!("{}_{}", name, i + 1)
                } else {
                    name.to_string()
                };
                let mut prompt = Prompt::new(prompt_name, input).with_chat_context(multi_turn);
                prompt.metadata.model = Some(ModelRef::Detailed {
                    name: request.model.clone(),
                    settings: settings.clone(),
                });
                prompt.metadata.parameters = params.clone();
                if i == 0 {
                    if let Some(system) = &system {
                        prompt
                            .metadata
                            .extra
                            .insert("system_prompt".to_string(), json!(system));
                    }
                }
                if let Some(reply) = reply {
                    prompt.outputs.push(Output::execute_result(reply));
                }
                prompt
            })
            .collect();

        Ok(prompts)
    }

    async fn deserialize(&self, resolved: &ResolvedPrompt) -> AppResult<BackendRequest> {
        Ok(serde_json::to_value(self.chat_request(resolved))?)
    }

    async fn run(
        &self,
        resolved: &ResolvedPrompt,
        request: BackendRequest,
        options: &InferenceOptions,
    ) -> AppResult<Vec<Output>> {
        let mut request: OllamaChatRequest = serde_json::from_value(request)
            .map_err(|e| AppError::Backend(format!("Invalid Ollama request: {}", e)))?;
        request.stream = options.stream;

        tracing::info!(
            "Sending chat request to Ollama ({}, {} messages)",
            request.model,
            request.messages.len()
        );
        let response = self.post(&request).await?;

        let mut acc = DeltaAccumulator::new(options);
        if request.stream {
            self.stream_response(response, &mut acc).await?;
        } else {
            let body: OllamaChatResponse = response
                .json()
                .await
                .map_err(|e| AppError::Backend(format!("Failed to parse Ollama response: {}", e)))?;
            if let Some(error) = body.error {
                return Err(AppError::Backend(format!("Ollama error: {}", error)));
            }
            if let Some(message) = body.message {
                acc.push(&message.content);
            }
        }

        tracing::info!("Received completion from Ollama for '{}'", resolved.prompt.name);

        let mut output = Output::execute_result(acc.finish());
        if let Output::ExecuteResult(ref mut result) = output {
            result
                .metadata
                .insert("model".to_string(), json!(request.model));
        }
        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiconfig_prompt::{ChainEntry, DependencyPlan};

    fn resolved(settings: Value) -> ResolvedPrompt {
        ResolvedPrompt {
            prompt: Prompt::new("p", "Why is the sky blue?"),
            model: "llama3.2".to_string(),
            settings: settings.as_object().cloned().unwrap(),
            params: Params::new(),
            plan: DependencyPlan {
                history: Vec::new(),
                target: ChainEntry {
                    prompt_name: "p".to_string(),
                    resolved_input: json!("Why is the sky blue?"),
                    output_text: String::new(),
                },
            },
        }
    }

    #[test]
    fn test_backend_creation() {
        let backend = OllamaBackend::new();
        assert_eq!(backend.id(), "ollama");
        assert_eq!(backend.endpoint(), "http://localhost:11434");
        assert_eq!(OllamaBackend::with_endpoint("http://gpu:11434/").endpoint(), "http://gpu:11434");
    }

    #[tokio::test]
    async fn test_deserialize_builds_chat_request() {
        let backend = OllamaBackend::new();
        let request = backend
            .deserialize(&resolved(json!({
                "temperature": 0.2,
                "system_prompt": "Be brief",
            })))
            .await
            .unwrap();

        assert_eq!(request["model"], json!("llama3.2"));
        assert_eq!(request["options"], json!({"temperature": 0.2}));
        assert_eq!(
            request["messages"],
            json!([
                {"role": "system", "content": "Be brief"},
                {"role": "user", "content": "Why is the sky blue?"}
            ])
        );
    }

    #[tokio::test]
    async fn test_settings_model_overrides_alias() {
        let backend = OllamaBackend::new();
        let request = backend
            .deserialize(&resolved(json!({"model": "qwen2.5:7b"})))
            .await
            .unwrap();
        assert_eq!(request["model"], json!("qwen2.5:7b"));
        assert!(request.get("options").is_none());
    }

    #[tokio::test]
    async fn test_serialize_conversation() {
        let backend = OllamaBackend::new();
        let data = json!({
            "model": "llama3.2",
            "messages": [
                {"role": "system", "content": "You are terse"},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "Bye"}
            ]
        });

        let prompts = backend.serialize("chat", &data, &Params::new()).await.unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].name, "chat_1");
        assert_eq!(prompts[1].name, "chat_2");
        assert!(prompts.iter().all(|p| p.remembers_chat_context()));
        assert_eq!(prompts[0].latest_output().unwrap().text(), "Hello");
        assert!(prompts[1].outputs.is_empty());
        assert_eq!(prompts[0].metadata.extra["system_prompt"], json!("You are terse"));
        assert_eq!(prompts[1].model_name(), Some("llama3.2"));
    }

    #[tokio::test]
    async fn test_serialize_rejects_payload_without_user_turn() {
        let backend = OllamaBackend::new();
        let data = json!({"messages": [{"role": "system", "content": "x"}]});
        assert!(matches!(
            backend.serialize("chat", &data, &Params::new()).await,
            Err(AppError::Serialization(_))
        ));
        assert!(backend.serialize("chat", &json!({}), &Params::new()).await.is_err());
    }

    #[test]
    fn test_line_buffer_handles_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"message\":{\"role\":\"assistant\",").is_empty());

        let lines = buffer.push(b"\"content\":\"Hi\"},\"done\":false}\n{\"done\":true}\n{\"mess");
        assert_eq!(lines.len(), 2);
        assert_eq!(parse_chunk(&lines[0]).unwrap().message.unwrap().content, "Hi");
        assert!(parse_chunk(&lines[1]).unwrap().done);
        assert_eq!(buffer.finish().as_deref(), Some("{\"mess"));
    }

    #[test]
    fn test_error_chunk_is_backend_error() {
        assert!(matches!(
            parse_chunk("{\"error\":\"model not found\"}"),
            Err(AppError::Backend(msg)) if msg.contains("model not found")
        ));
    }
}
