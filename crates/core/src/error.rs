//! Error types for the AIConfig engine.
//!
//! This module defines a unified error enum covering every failure the
//! engine surfaces to callers: configuration, I/O, template resolution,
//! document lookups, backend dispatch and run lifecycle errors.

use thiserror::Error;

/// Unified error type for the AIConfig engine.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// Callback failures are deliberately absent: they are logged and swallowed
/// inside the runtime and never reach a caller.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed template syntax
    #[error("Template error: {0}")]
    Template(String),

    /// A template placeholder names a key absent from the bindings
    #[error("Unresolved parameter: '{name}' has no binding")]
    UnresolvedParameter { name: String },

    /// The named prompt does not exist in the document
    #[error("Prompt not found: '{name}'")]
    PromptNotFound { name: String },

    /// A prompt with this name already exists in the document
    #[error("Duplicate prompt name: '{name}'")]
    DuplicatePrompt { name: String },

    /// No backend is registered for the requested model
    #[error("Unknown model: no backend registered for '{name}'")]
    UnknownModel { name: String },

    /// A run for this prompt is already in flight
    #[error("Prompt '{prompt}' is already running")]
    AlreadyRunning { prompt: String },

    /// A backend's run failed; the failure was also recorded as an Output
    #[error("Backend execution failed for '{prompt}': {ename}: {evalue}")]
    BackendExecution {
        prompt: String,
        ename: String,
        evalue: String,
    },

    /// Failure raised by a backend implementation
    #[error("Backend error: {0}")]
    Backend(String),

    /// The run was cancelled before the backend returned
    #[error("Run of '{prompt}' was cancelled")]
    Cancelled { prompt: String },

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Stable short name of the error kind.
    ///
    /// Used as `ename` when a failure is materialised as an error output.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigError",
            AppError::Io(_) => "IoError",
            AppError::Serialization(_) => "SerializationError",
            AppError::Template(_) => "TemplateError",
            AppError::UnresolvedParameter { .. } => "UnresolvedParameterError",
            AppError::PromptNotFound { .. } => "PromptNotFoundError",
            AppError::DuplicatePrompt { .. } => "DuplicatePromptError",
            AppError::UnknownModel { .. } => "UnknownModelError",
            AppError::AlreadyRunning { .. } => "AlreadyRunningError",
            AppError::BackendExecution { .. } => "BackendExecutionError",
            AppError::Backend(_) => "BackendError",
            AppError::Cancelled { .. } => "CancelledError",
            AppError::Other(_) => "Error",
        }
    }

    pub fn prompt_not_found(name: impl Into<String>) -> Self {
        AppError::PromptNotFound { name: name.into() }
    }

    pub fn unknown_model(name: impl Into<String>) -> Self {
        AppError::UnknownModel { name: name.into() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
