//! Timeout-bounded callback bus.
//!
//! Every pipeline phase emits a [`CallbackEvent`] to all registered
//! callbacks. Callbacks run concurrently, each in its own task under its own
//! timeout. A callback that errors, panics or overruns is logged and
//! abandoned; it never delays other callbacks beyond its timeout and never
//! changes the outcome of the run that emitted the event.

use aiconfig_core::config::DEFAULT_CALLBACK_TIMEOUT_MS;
use aiconfig_core::AppResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Pipeline phases that emit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    OnResolveStart,
    OnResolveEnd,
    OnDeserializeStart,
    OnDeserializeEnd,
    OnRunStart,
    OnRunEnd,
    OnSerializeStart,
    OnSerializeEnd,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::OnResolveStart => "on_resolve_start",
            EventName::OnResolveEnd => "on_resolve_end",
            EventName::OnDeserializeStart => "on_deserialize_start",
            EventName::OnDeserializeEnd => "on_deserialize_end",
            EventName::OnRunStart => "on_run_start",
            EventName::OnRunEnd => "on_run_end",
            EventName::OnSerializeStart => "on_serialize_start",
            EventName::OnSerializeEnd => "on_serialize_end",
        };
        f.write_str(name)
    }
}

/// Event delivered to callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackEvent {
    pub name: EventName,

    /// Emitting component (e.g., "engine", or a backend id)
    pub source: String,

    pub data: Value,

    pub ts: DateTime<Utc>,
}

impl CallbackEvent {
    pub fn new(name: EventName, source: impl Into<String>, data: Value) -> Self {
        Self {
            name,
            source: source.into(),
            data,
            ts: Utc::now(),
        }
    }
}

/// Receiver of pipeline events.
#[async_trait::async_trait]
pub trait Callback: Send + Sync {
    async fn on_event(&self, event: &CallbackEvent) -> AppResult<()>;
}

/// Adapter turning an async closure into a [`Callback`].
pub struct FnCallback<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Callback for FnCallback<F>
where
    F: Fn(CallbackEvent) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<()>> + Send,
{
    async fn on_event(&self, event: &CallbackEvent) -> AppResult<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable callback.
///
/// # Example
/// ```
/// use aiconfig_runtime::callbacks::callback_fn;
///
/// let cb = callback_fn(|event| async move {
///     println!("{} from {}", event.name, event.source);
///     Ok(())
/// });
/// # let _ = cb;
/// ```
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn Callback>
where
    F: Fn(CallbackEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(FnCallback(f))
}

/// Why a callback invocation was abandoned. Logged, never surfaced.
#[derive(Debug, Error)]
pub(crate) enum CallbackFailure {
    #[error("callback timed out after {0:?}")]
    TimedOut(Duration),

    #[error("callback failed: {0}")]
    Failed(String),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

#[derive(Clone)]
struct Registration {
    callback: Arc<dyn Callback>,
    timeout: Duration,
}

/// Registry of callbacks with per-callback timeouts.
///
/// Registration is monotonic; build a new manager to replace the set.
#[derive(Clone)]
pub struct CallbackManager {
    registrations: Arc<RwLock<Vec<Registration>>>,
    default_timeout: Duration,
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CALLBACK_TIMEOUT_MS))
    }
}

impl CallbackManager {
    /// Create a manager whose callbacks default to `default_timeout`.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            registrations: Arc::new(RwLock::new(Vec::new())),
            default_timeout,
        }
    }

    /// Register a callback, optionally with its own timeout.
    pub fn register(&self, callback: Arc<dyn Callback>, timeout: Option<Duration>) {
        self.registrations.write().push(Registration {
            callback,
            timeout: timeout.unwrap_or(self.default_timeout),
        });
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every callback and wait until each has finished
    /// or been abandoned.
    pub async fn emit(&self, event: CallbackEvent) {
        let failures = self.dispatch(event).await;
        if !failures.is_empty() {
            tracing::debug!("{} callback(s) abandoned", failures.len());
        }
    }

    pub(crate) async fn dispatch(&self, event: CallbackEvent) -> Vec<CallbackFailure> {
        let registrations = self.registrations.read().clone();
        if registrations.is_empty() {
            return Vec::new();
        }

        let event = Arc::new(event);
        let tasks = registrations.into_iter().map(|registration| {
            let event = event.clone();
            let timeout = registration.timeout;
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, registration.callback.on_event(&event)).await
            });
            async move {
                match handle.await {
                    Ok(Ok(Ok(()))) => None,
                    Ok(Ok(Err(e))) => Some(CallbackFailure::Failed(e.to_string())),
                    Ok(Err(_)) => Some(CallbackFailure::TimedOut(timeout)),
                    Err(e) => Some(CallbackFailure::Panicked(e.to_string())),
                }
            }
        });

        let failures: Vec<CallbackFailure> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .collect();

        for failure in &failures {
            tracing::warn!("Callback for {} ({}): {}", event.name, event.source, failure);
        }
        failures
    }
}

impl fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackManager")
            .field("callbacks", &self.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
