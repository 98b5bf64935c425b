//! Backend contract and request/response types.
//!
//! A backend is a capability set, not a class hierarchy: four operations
//! (`serialize`, `deserialize`, `run`, `output_text`) implemented by any type
//! plugged into the [`BackendRegistry`](crate::BackendRegistry). Templating
//! and parameter merging happen before a backend sees a prompt.
//!
//! Cancellation boundary: when a run is cancelled the engine stops awaiting
//! the backend's future and drops it. Aborting any underlying network call
//! is the backend's responsibility.

use aiconfig_core::AppResult;
use aiconfig_prompt::{DependencyPlan, Output, Params, Prompt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Backend-specific request payload produced by `deserialize`.
pub type BackendRequest = Value;

/// Everything a backend needs to build and execute one request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPrompt {
    /// Snapshot of the target prompt
    pub prompt: Prompt,

    /// Model name the prompt runs against
    pub model: String,

    /// Document-level model settings overlaid by the prompt's own
    pub settings: Map<String, Value>,

    /// Merged parameter binding used for resolution
    pub params: Params,

    /// Chat history and the resolved target input
    pub plan: DependencyPlan,
}

impl ResolvedPrompt {
    /// Resolved target input as text.
    pub fn input_text(&self) -> String {
        value_text(&self.plan.target.resolved_input)
    }

    /// System prompt declared in the prompt's metadata, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.prompt
            .metadata
            .extra
            .get("system_prompt")
            .or_else(|| self.settings.get("system_prompt"))
            .and_then(Value::as_str)
    }
}

/// One turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Flatten a resolved prompt into chat messages.
///
/// System prompt first, then one user/assistant pair per history entry,
/// then the target as the final user message.
pub fn chat_messages(resolved: &ResolvedPrompt) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if let Some(system) = resolved.system_prompt() {
        messages.push(ChatMessage::new("system", system));
    }

    for entry in &resolved.plan.history {
        messages.push(ChatMessage::new("user", value_text(&entry.resolved_input)));
        if !entry.output_text.is_empty() {
            messages.push(ChatMessage::new("assistant", entry.output_text.clone()));
        }
    }

    messages.push(ChatMessage::new("user", resolved.input_text()));
    messages
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One incremental streaming delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDelta {
    /// Newly produced text
    pub delta: String,

    /// All text produced so far, including `delta`
    pub accumulated: String,

    /// Zero-based position of this delta in the stream
    pub index: usize,
}

/// Caller-supplied sink for streaming deltas.
pub type StreamCallback = Arc<dyn Fn(&StreamDelta) + Send + Sync>;

/// Options passed to a backend's `run`.
#[derive(Clone, Default)]
pub struct InferenceOptions {
    /// Deliver output incrementally when the backend supports it
    pub stream: bool,

    pub stream_callback: Option<StreamCallback>,
}

impl fmt::Debug for InferenceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceOptions")
            .field("stream", &self.stream)
            .field("stream_callback", &self.stream_callback.is_some())
            .finish()
    }
}

/// Accumulates streamed text and forwards each delta to the caller.
pub struct DeltaAccumulator {
    accumulated: String,
    index: usize,
    callback: Option<StreamCallback>,
}

impl DeltaAccumulator {
    pub fn new(options: &InferenceOptions) -> Self {
        Self {
            accumulated: String::new(),
            index: 0,
            callback: options
                .stream
                .then(|| options.stream_callback.clone())
                .flatten(),
        }
    }

    /// Record a delta; empty deltas are ignored.
    pub fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.accumulated.push_str(delta);

        if let Some(callback) = &self.callback {
            callback(&StreamDelta {
                delta: delta.to_string(),
                accumulated: self.accumulated.clone(),
                index: self.index,
            });
        }
        self.index += 1;
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn finish(self) -> String {
        self.accumulated
    }
}

/// Trait for model backends.
///
/// Implementations must be cheap to share (`Arc<dyn Backend>`) and safe to
/// call concurrently for different prompts.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Backend identifier (e.g., "echo", "ollama").
    fn id(&self) -> &str;

    /// Whether `run` can deliver output incrementally.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Convert a backend-native request into document prompts.
    ///
    /// # Arguments
    /// * `name` - Name for the prompt(s) produced; backends producing more
    ///   than one prompt suffix it
    /// * `data` - Backend-native payload
    /// * `params` - Parameters to attach to the prompt(s)
    async fn serialize(&self, name: &str, data: &Value, params: &Params) -> AppResult<Vec<Prompt>>;

    /// Build the backend-native request for a resolved prompt.
    async fn deserialize(&self, resolved: &ResolvedPrompt) -> AppResult<BackendRequest>;

    /// Execute a request and return the final output(s).
    ///
    /// When `options.stream` is set, deltas go through `options.stream_callback`
    /// before this returns the aggregated output.
    async fn run(
        &self,
        resolved: &ResolvedPrompt,
        request: BackendRequest,
        options: &InferenceOptions,
    ) -> AppResult<Vec<Output>>;

    /// Text of an output produced by this backend.
    fn output_text(&self, output: &Output) -> String {
        output.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiconfig_prompt::ChainEntry;
    use parking_lot::Mutex;
    use serde_json::json;

    fn resolved() -> ResolvedPrompt {
        let mut prompt = Prompt::new("p2", "How are you?");
        prompt
            .metadata
            .extra
            .insert("system_prompt".to_string(), json!("Be terse"));

        ResolvedPrompt {
            prompt,
            model: "echo".to_string(),
            settings: Map::new(),
            params: Params::new(),
            plan: DependencyPlan {
                history: vec![ChainEntry {
                    prompt_name: "p1".to_string(),
                    resolved_input: json!("Hello"),
                    output_text: "Hi".to_string(),
                }],
                target: ChainEntry {
                    prompt_name: "p2".to_string(),
                    resolved_input: json!("How are you?"),
                    output_text: String::new(),
                },
            },
        }
    }

    #[test]
    fn test_chat_messages() {
        let messages = chat_messages(&resolved());
        assert_eq!(
            messages,
            vec![
                ChatMessage::new("system", "Be terse"),
                ChatMessage::new("user", "Hello"),
                ChatMessage::new("assistant", "Hi"),
                ChatMessage::new("user", "How are you?"),
            ]
        );
    }

    #[test]
    fn test_accumulator_forwards_deltas() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = InferenceOptions {
            stream: true,
            stream_callback: Some(Arc::new(move |d: &StreamDelta| sink.lock().push(d.clone()))),
        };

        let mut acc = DeltaAccumulator::new(&options);
        acc.push("Hel");
        acc.push("");
        acc.push("lo");
        assert_eq!(acc.finish(), "Hello");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].accumulated, "Hello");
        assert_eq!(seen[1].index, 1);
    }

    #[test]
    fn test_accumulator_silent_without_stream_flag() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let options = InferenceOptions {
            stream: false,
            stream_callback: Some(Arc::new(move |_: &StreamDelta| *counter.lock() += 1)),
        };

        let mut acc = DeltaAccumulator::new(&options);
        acc.push("text");
        assert_eq!(acc.accumulated(), "text");
        assert_eq!(*calls.lock(), 0);
    }
}
