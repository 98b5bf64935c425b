//! Prompt types for the AIConfig document.
//!
//! This module defines the entities stored inside a [`Document`](crate::Document):
//! prompts, their inputs and attachments, model references and run outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A parameter binding: top-level key to any JSON value.
pub type Params = Map<String, Value>;

/// One named unit of input, model settings and output history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Document-unique name
    pub name: String,

    /// Prompt input, plain text or structured
    pub input: PromptInput,

    /// Model reference, local parameters and backend-specific fields
    #[serde(default)]
    pub metadata: PromptMetadata,

    /// Results of prior runs, most recent last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

impl Prompt {
    /// Create a text prompt with no model or parameters.
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: PromptInput::Text(input.into()),
            metadata: PromptMetadata::default(),
            outputs: Vec::new(),
        }
    }

    /// Set the model by bare name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metadata.model = Some(ModelRef::Name(model.into()));
        self
    }

    /// Set a prompt-local parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.parameters.insert(key.into(), value.into());
        self
    }

    /// Mark this prompt as carrying chat context.
    pub fn with_chat_context(mut self, remember: bool) -> Self {
        self.metadata.remember_chat_context = Some(remember);
        self
    }

    /// Name of the model this prompt references, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.metadata.model.as_ref().map(ModelRef::name)
    }

    /// Whether the prompt participates in chat history reconstruction.
    pub fn remembers_chat_context(&self) -> bool {
        self.metadata.remember_chat_context.unwrap_or(false)
    }

    /// The most recent output, if the prompt has been run.
    pub fn latest_output(&self) -> Option<&Output> {
        self.outputs.last()
    }
}

/// Prompt input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    /// Plain text, possibly containing `{{placeholders}}`
    Text(String),

    /// Structured input with optional non-text attachments
    Structured(StructuredInput),
}

impl PromptInput {
    /// Text form of the input as stored (placeholders unresolved).
    pub fn as_text(&self) -> String {
        match self {
            PromptInput::Text(text) => text.clone(),
            PromptInput::Structured(structured) => match &structured.data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Attachments carried by a structured input.
    pub fn attachments(&self) -> &[Attachment] {
        match self {
            PromptInput::Text(_) => &[],
            PromptInput::Structured(structured) => structured.attachments.as_deref().unwrap_or(&[]),
        }
    }
}

impl From<&str> for PromptInput {
    fn from(text: &str) -> Self {
        PromptInput::Text(text.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(text: String) -> Self {
        PromptInput::Text(text)
    }
}

/// Structured prompt input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredInput {
    /// Main payload; string leaves may contain placeholders
    pub data: Value,

    /// Non-text payloads, identified by position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,

    /// Backend-specific extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Non-text payload (image, audio) attached to a structured input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: Option<String>,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Reference to a model: bare name or name plus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelRef {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<Map<String, Value>>,
    },
}

impl ModelRef {
    pub fn name(&self) -> &str {
        match self {
            ModelRef::Name(name) => name,
            ModelRef::Detailed { name, .. } => name,
        }
    }

    /// Settings declared inline on the prompt.
    pub fn settings(&self) -> Option<&Map<String, Value>> {
        match self {
            ModelRef::Name(_) => None,
            ModelRef::Detailed { settings, .. } => settings.as_ref(),
        }
    }
}

/// Per-prompt metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,

    /// Parameters local to this prompt
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Params,

    /// Include this prompt in chat history reconstruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_chat_context: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Fields a specific backend may interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a run, tagged by `output_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    ExecuteResult(ExecuteResult),
    Error(ErrorOutput),
}

impl Output {
    /// Successful output carrying `data`.
    pub fn execute_result(data: impl Into<Value>) -> Self {
        Output::ExecuteResult(ExecuteResult {
            data: data.into(),
            execution_count: None,
            mime_type: None,
            metadata: Map::new(),
        })
    }

    /// Error output.
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Output::Error(ErrorOutput {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error(_))
    }

    /// Default text extraction.
    ///
    /// Strings are returned as-is, objects with a string `value` yield that
    /// value, anything else is rendered as JSON. Error outputs carry no
    /// response text and yield an empty string.
    pub fn text(&self) -> String {
        match self {
            Output::ExecuteResult(result) => match &result.data {
                Value::String(s) => s.clone(),
                Value::Object(obj) => match obj.get("value") {
                    Some(Value::String(s)) => s.clone(),
                    _ => result.data.to_string(),
                },
                other => other.to_string(),
            },
            Output::Error(_) => String::new(),
        }
    }
}

/// Successful run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Failed run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}
