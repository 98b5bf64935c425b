//! Execution runtime for AIConfig documents.
//!
//! This crate runs the prompts of a [`Document`](aiconfig_prompt::Document)
//! against pluggable model backends:
//! - [`Backend`]: the contract every model integration implements
//! - [`BackendRegistry`]: model name / alias to backend lookup
//! - [`Engine`]: resolve, dispatch and run prompts with single-flight,
//!   cancellation and streaming
//! - [`CallbackManager`]: timeout-bounded lifecycle event bus
//!
//! # Backends
//! - **echo**: offline, returns the resolved input
//! - **ollama**: local LLM runtime
//!
//! # Example
//! ```no_run
//! use aiconfig_prompt::{Document, Params, Prompt};
//! use aiconfig_runtime::{providers::OllamaBackend, BackendRegistry, CallbackManager, Engine, RunOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = BackendRegistry::new();
//! registry.register(Arc::new(OllamaBackend::new()), ["llama3.2"]);
//!
//! let doc = Document::with_prompts("demo", vec![Prompt::new("ask", "Hello!").with_model("llama3.2")])?;
//! let engine = Engine::new(doc, registry, CallbackManager::default());
//! let outputs = engine.run("ask", Params::new(), RunOptions::default()).await?;
//! println!("{}", outputs[0].text());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod callbacks;
pub mod cancel;
pub mod engine;
pub mod providers;
pub mod registry;

// Re-export main types
pub use backend::{
    chat_messages, Backend, BackendRequest, ChatMessage, DeltaAccumulator, InferenceOptions,
    ResolvedPrompt, StreamCallback, StreamDelta,
};
pub use callbacks::{callback_fn, Callback, CallbackEvent, CallbackManager, EventName};
pub use cancel::CancellationToken;
pub use engine::{Engine, RunHandle, RunOptions, RunState};
pub use providers::{EchoBackend, OllamaBackend};
pub use registry::BackendRegistry;
