//! Command handlers for the AIConfig CLI.
//!
//! This module organizes all CLI commands into separate submodules and
//! holds the session wiring they share.

pub mod list;
pub mod resolve;
pub mod run;

// Re-export command types for convenience
pub use list::ListCommand;
pub use resolve::ResolveCommand;
pub use run::RunCommand;

use aiconfig_core::{config::AppConfig, AppResult};
use aiconfig_prompt::{load_document, Document};
use aiconfig_runtime::{callback_fn, BackendRegistry, CallbackManager, EchoBackend, Engine, OllamaBackend};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

/// Registry with the built-in backends and the configured default model.
pub fn build_registry(config: &AppConfig) -> AppResult<BackendRegistry> {
    let registry = BackendRegistry::new();
    registry.register(Arc::new(EchoBackend::new()), Vec::<String>::new());
    registry.register(
        Arc::new(OllamaBackend::with_endpoint(&config.ollama.endpoint)),
        config.ollama.aliases.iter().cloned(),
    );

    if let Some(model) = &config.default_model {
        registry.set_default(model)?;
    }

    tracing::debug!("Registered backends: {:?}", registry.names());
    Ok(registry)
}

/// Engine for one document, with lifecycle events traced at debug level.
pub fn build_engine(config: &AppConfig, document: Document) -> AppResult<Engine> {
    let registry = build_registry(config)?;
    let callbacks = CallbackManager::new(config.callback_timeout());
    callbacks.register(
        callback_fn(|event| async move {
            tracing::debug!(source = %event.source, "{}", event.name);
            Ok(())
        }),
        None,
    );
    Ok(Engine::new(document, registry, callbacks))
}

pub fn open_document(path: &Path) -> anyhow::Result<Document> {
    load_document(path).with_context(|| format!("Failed to load document {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiconfig_core::AppError;

    #[test]
    fn test_registry_has_builtins_and_aliases() {
        let registry = build_registry(&AppConfig::default()).unwrap();
        assert!(registry.contains("echo"));
        assert!(registry.contains("ollama"));
        assert_eq!(registry.lookup("llama3.2").unwrap().id(), "ollama");
        assert_eq!(registry.default_name(), None);
    }

    #[test]
    fn test_default_model_must_be_registered() {
        let mut config = AppConfig::default();
        config.default_model = Some("echo".to_string());
        assert_eq!(build_registry(&config).unwrap().default_name().as_deref(), Some("echo"));

        config.default_model = Some("gpt-9".to_string());
        assert!(matches!(build_registry(&config), Err(AppError::UnknownModel { .. })));
    }
}
