//! Backend registry.
//!
//! Maps model names and aliases to registered backends. A registry is an
//! explicit value owned by a runtime session and injected into the
//! [`Engine`](crate::Engine); independent sessions can hold different
//! registries.
//!
//! Registering an alias that already exists replaces the previous entry, so
//! callers can override a built-in backend with their own.

use crate::backend::Backend;
use aiconfig_core::{AppError, AppResult};
use aiconfig_prompt::Document;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Name reported when a prompt has no model and no default is set.
const UNSPECIFIED_MODEL: &str = "<unspecified>";

#[derive(Default)]
struct RegistryInner {
    backends: HashMap<String, Arc<dyn Backend>>,
    default: Option<String>,
}

/// Shared, clonable handle to a set of registered backends.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own id and every alias.
    ///
    /// Existing entries with the same names are replaced.
    pub fn register<I, S>(&self, backend: Arc<dyn Backend>, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write();
        let names = std::iter::once(backend.id().to_string()).chain(aliases.into_iter().map(Into::into));

        for name in names {
            if let Some(previous) = inner.backends.insert(name.clone(), backend.clone()) {
                tracing::debug!(
                    "Alias '{}' re-registered: {} -> {}",
                    name,
                    previous.id(),
                    backend.id()
                );
            }
        }
    }

    /// Look up a backend by model name or alias.
    pub fn lookup(&self, name: &str) -> AppResult<Arc<dyn Backend>> {
        self.inner
            .read()
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::unknown_model(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().backends.contains_key(name)
    }

    /// Designate the fallback entry; it must already be registered.
    pub fn set_default(&self, name: &str) -> AppResult<()> {
        let mut inner = self.inner.write();
        if !inner.backends.contains_key(name) {
            return Err(AppError::unknown_model(name));
        }
        inner.default = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<String> {
        self.inner.read().default.clone()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the backend for a prompt's model inside `document`.
    ///
    /// With no model the default entry is used. Otherwise the document's
    /// `model_parsers` override is consulted before the model name itself.
    /// Returns the effective model name alongside the backend.
    pub fn backend_for(
        &self,
        model: Option<&str>,
        document: &Document,
    ) -> AppResult<(String, Arc<dyn Backend>)> {
        let Some(model) = model else {
            let default = self
                .default_name()
                .ok_or_else(|| AppError::unknown_model(UNSPECIFIED_MODEL))?;
            let backend = self.lookup(&default)?;
            return Ok((default, backend));
        };

        let key = document
            .metadata
            .model_parsers
            .get(model)
            .map(String::as_str)
            .unwrap_or(model);

        let backend = self.lookup(key).map_err(|_| AppError::unknown_model(model))?;
        Ok((model.to_string(), backend))
    }
}
