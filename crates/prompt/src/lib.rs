//! Prompt document model for AIConfig.
//!
//! This crate provides the backend-agnostic half of the engine:
//! - The [`Document`] / [`Prompt`] / [`Output`] data model
//! - `{{placeholder}}` template resolution
//! - Parameter merging with defined precedence
//! - Chat history reconstruction across prompts
//! - JSON/YAML document loading

pub mod chain;
pub mod document;
pub mod loader;
pub mod params;
pub mod template;
pub mod types;

// Re-export main types
pub use chain::{resolve_dependencies, ChainEntry, DependencyPlan};
pub use document::{Document, DocumentMetadata};
pub use loader::{find_documents, load_document, save_document};
pub use params::{binding_for, merge_parameters, parse_assignments};
pub use types::{
    Attachment, ErrorOutput, ExecuteResult, ModelRef, Output, Params, Prompt, PromptInput,
    PromptMetadata, StructuredInput,
};
