//! Execution dispatcher.
//!
//! The [`Engine`] owns one document, one backend registry and one callback
//! bus. A run moves a prompt through
//! `Idle → Resolving → Dispatching → Running → {Succeeded | Failed | Cancelled}`:
//!
//! 1. Resolving: look up the backend, build the dependency plan and resolve
//!    templates against the merged parameters
//! 2. Dispatching: the backend builds its native request (`deserialize`)
//! 3. Running: the backend executes, optionally streaming deltas
//!
//! At most one run per prompt name is in flight; distinct prompts run
//! concurrently. Outputs are appended to the document only by the engine,
//! and readers always get a cloned snapshot.

use crate::backend::{Backend, BackendRequest, InferenceOptions, ResolvedPrompt, StreamCallback};
use crate::callbacks::{Callback, CallbackEvent, CallbackManager, EventName};
use crate::cancel::CancellationToken;
use crate::registry::BackendRegistry;
use aiconfig_core::{AppError, AppResult};
use aiconfig_prompt::{binding_for, resolve_dependencies, Document, Output, Params, Prompt};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Source identifier on events emitted by the engine.
const EVENT_SOURCE: &str = "engine";

/// Lifecycle state of a prompt's most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Resolving,
    Dispatching,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Caller options for a run.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub stream: bool,
    pub stream_callback: Option<StreamCallback>,
    pub cancellation: Option<CancellationToken>,
}

impl RunOptions {
    /// Stream deltas to `callback`.
    pub fn streaming(callback: StreamCallback) -> Self {
        Self {
            stream: true,
            stream_callback: Some(callback),
            cancellation: None,
        }
    }

    /// Use a caller-created cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("stream", &self.stream)
            .field("stream_callback", &self.stream_callback.is_some())
            .field("cancellation", &self.cancellation.as_ref().map(|t| t.id()))
            .finish()
    }
}

/// Handle to an in-flight run.
pub struct RunHandle {
    prompt: String,
    token: CancellationToken,
    task: JoinHandle<AppResult<Vec<Output>>>,
}

impl RunHandle {
    /// Run id; also accepted by [`Engine::cancel`].
    pub fn id(&self) -> Uuid {
        self.token.id()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> AppResult<Vec<Output>> {
        self.task
            .await
            .map_err(|e| AppError::Other(format!("Run task for '{}' failed: {}", self.prompt, e)))?
    }
}

/// Why a pipeline stopped before producing outputs.
enum RunFailure {
    /// Resolution, lookup or request building failed
    Setup(AppError),
    /// The backend's `run` failed
    Backend(AppError),
}

impl From<AppError> for RunFailure {
    fn from(err: AppError) -> Self {
        RunFailure::Setup(err)
    }
}

struct EngineInner {
    document: RwLock<Document>,
    registry: BackendRegistry,
    callbacks: CallbackManager,
    /// In-flight runs by prompt name
    active: Mutex<HashMap<String, CancellationToken>>,
    states: Mutex<HashMap<String, RunState>>,
}

/// Removes the in-flight entry when a run ends, however it ends.
struct ActiveRunGuard {
    inner: Arc<EngineInner>,
    prompt: String,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.inner.active.lock().remove(&self.prompt);

        let mut states = self.inner.states.lock();
        if let Some(state) = states.get_mut(&self.prompt) {
            if !state.is_terminal() {
                tracing::warn!("Run of '{}' ended abnormally in {:?}", self.prompt, state);
                *state = RunState::Failed;
            }
        }
    }
}

fn ensure_idle(active: &HashMap<String, CancellationToken>, prompt: &str) -> AppResult<()> {
    if active.contains_key(prompt) {
        return Err(AppError::AlreadyRunning {
            prompt: prompt.to_string(),
        });
    }
    Ok(())
}

/// Message carried by a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Prompt resolution and execution engine.
///
/// Cheap to clone; clones share the same document, registry and bus.
///
/// # Example
/// ```no_run
/// use aiconfig_prompt::{Document, Params, Prompt};
/// use aiconfig_runtime::{BackendRegistry, CallbackManager, Engine, EchoBackend, RunOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = BackendRegistry::new();
/// registry.register(Arc::new(EchoBackend::new()), ["echo-chat"]);
///
/// let doc = Document::with_prompts("demo", vec![Prompt::new("hi", "Hello {{name}}").with_model("echo")])?;
/// let engine = Engine::new(doc, registry, CallbackManager::default());
///
/// let mut params = Params::new();
/// params.insert("name".into(), "Bo".into());
/// let outputs = engine.run("hi", params, RunOptions::default()).await?;
/// println!("{}", outputs[0].text());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(document: Document, registry: BackendRegistry, callbacks: CallbackManager) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                document: RwLock::new(document),
                registry,
                callbacks,
                active: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.inner.callbacks
    }

    /// Register an event callback; `timeout` defaults to the bus default.
    pub fn register_callback(&self, callback: Arc<dyn Callback>, timeout: Option<Duration>) {
        self.inner.callbacks.register(callback, timeout);
    }

    /// Consistent snapshot of the document.
    pub fn document(&self) -> Document {
        self.inner.document.read().clone()
    }

    /// Snapshot of one prompt.
    pub fn prompt(&self, name: &str) -> AppResult<Prompt> {
        self.inner.document.read().prompt(name).cloned()
    }

    /// Lifecycle state of the prompt's most recent run.
    pub fn state(&self, prompt: &str) -> RunState {
        self.inner
            .states
            .lock()
            .get(prompt)
            .copied()
            .unwrap_or(RunState::Idle)
    }

    pub fn is_running(&self, prompt: &str) -> bool {
        self.inner.active.lock().contains_key(prompt)
    }

    /// Add a prompt; duplicates are rejected.
    pub fn add_prompt(&self, prompt: Prompt, index: Option<usize>) -> AppResult<()> {
        self.inner.document.write().add_prompt(prompt, index)
    }

    /// Replace a prompt that is not currently running.
    pub fn update_prompt(&self, name: &str, prompt: Prompt) -> AppResult<()> {
        // Holding `active` keeps `start` out until the edit is done.
        let active = self.inner.active.lock();
        ensure_idle(&active, name)?;
        if prompt.name != name {
            ensure_idle(&active, &prompt.name)?;
        }
        self.inner.document.write().update_prompt(name, prompt)
    }

    /// Delete a prompt that is not currently running.
    pub fn delete_prompt(&self, name: &str) -> AppResult<Prompt> {
        let active = self.inner.active.lock();
        ensure_idle(&active, name)?;
        let removed = self.inner.document.write().delete_prompt(name)?;
        self.inner.states.lock().remove(name);
        Ok(removed)
    }

    /// Set a document-level or prompt-level parameter.
    pub fn set_parameter(&self, key: &str, value: Value, prompt: Option<&str>) -> AppResult<()> {
        self.inner.document.write().set_parameter(key, value, prompt)
    }

    fn set_state(&self, prompt: &str, state: RunState) {
        tracing::trace!("'{}' -> {:?}", prompt, state);
        self.inner.states.lock().insert(prompt.to_string(), state);
    }

    /// Start a run in the background.
    ///
    /// The single-flight check happens here, synchronously: a second start
    /// for a prompt that is already in flight fails with
    /// [`AppError::AlreadyRunning`]. Must be called within a tokio runtime.
    pub fn start(&self, prompt: &str, params: Params, options: RunOptions) -> AppResult<RunHandle> {
        let token = options.cancellation.clone().unwrap_or_default();
        {
            // Lock order: `active`, then `document`.
            let mut active = self.inner.active.lock();
            self.inner.document.read().prompt(prompt)?;
            if let Err(err) = ensure_idle(&active, prompt) {
                tracing::warn!("Rejected run of '{}': already running", prompt);
                return Err(err);
            }
            active.insert(prompt.to_string(), token.clone());
        }
        let guard = ActiveRunGuard {
            inner: self.inner.clone(),
            prompt: prompt.to_string(),
        };
        self.set_state(prompt, RunState::Resolving);

        let span = tracing::info_span!("run", prompt = %prompt, run_id = %token.id());
        let engine = self.clone();
        let name = prompt.to_string();
        let run_token = token.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                engine.execute(&name, params, options, run_token).await
            }
            .instrument(span),
        );

        Ok(RunHandle {
            prompt: prompt.to_string(),
            token,
            task,
        })
    }

    /// Run a prompt to completion.
    pub async fn run(&self, prompt: &str, params: Params, options: RunOptions) -> AppResult<Vec<Output>> {
        self.start(prompt, params, options)?.wait().await
    }

    /// Cancel an in-flight run by id. Returns whether a run was found.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let active = self.inner.active.lock();
        match active.values().find(|token| token.id() == run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Resolve a prompt into its backend request without executing it.
    pub async fn resolve(&self, prompt: &str, params: &Params) -> AppResult<BackendRequest> {
        let snapshot = self.document();
        let (backend, resolved) = self.resolve_prompt(&snapshot, prompt, params).await?;
        self.build_request(backend.as_ref(), &resolved).await
    }

    /// Convert backend-native `data` into prompts via the model's backend.
    ///
    /// The prompts are returned, not added to the document.
    pub async fn serialize(
        &self,
        model: &str,
        name: &str,
        data: &Value,
        params: &Params,
    ) -> AppResult<Vec<Prompt>> {
        let backend = self.inner.registry.lookup(model)?;

        self.emit(
            EventName::OnSerializeStart,
            backend.id(),
            json!({ "prompt_name": name, "data": data, "params": params }),
        )
        .await;

        let prompts = backend.serialize(name, data, params).await?;

        self.emit(
            EventName::OnSerializeEnd,
            backend.id(),
            json!({ "result": &prompts }),
        )
        .await;

        Ok(prompts)
    }

    async fn emit(&self, name: EventName, source: &str, data: Value) {
        self.inner
            .callbacks
            .emit(CallbackEvent::new(name, source, data))
            .await;
    }

    async fn execute(
        &self,
        prompt: &str,
        params: Params,
        options: RunOptions,
        token: CancellationToken,
    ) -> AppResult<Vec<Output>> {
        tracing::info!("Running prompt '{}'", prompt);

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.pipeline(prompt, &params, &options) => Some(result),
        };

        match outcome {
            None => {
                self.set_state(prompt, RunState::Cancelled);
                tracing::info!("Run of '{}' cancelled", prompt);
                Err(AppError::Cancelled {
                    prompt: prompt.to_string(),
                })
            }
            Some(Ok(outputs)) => {
                {
                    let mut document = self.inner.document.write();
                    for output in &outputs {
                        document.add_output(prompt, output.clone())?;
                    }
                }
                self.set_state(prompt, RunState::Succeeded);
                tracing::info!("Run of '{}' succeeded ({} outputs)", prompt, outputs.len());
                Ok(outputs)
            }
            Some(Err(RunFailure::Backend(err))) => {
                let ename = err.kind().to_string();
                let evalue = err.to_string();
                tracing::error!("Backend failed for '{}': {}", prompt, evalue);

                let mut output = Output::error(ename.clone(), evalue.clone());
                if let Output::Error(ref mut error) = output {
                    error.traceback = vec![format!("{:?}", err)];
                }
                self.inner.document.write().add_output(prompt, output)?;
                self.set_state(prompt, RunState::Failed);

                Err(AppError::BackendExecution {
                    prompt: prompt.to_string(),
                    ename,
                    evalue,
                })
            }
            Some(Err(RunFailure::Setup(err))) => {
                self.set_state(prompt, RunState::Failed);
                tracing::warn!("Run of '{}' failed before dispatch: {}", prompt, err);
                Err(err)
            }
        }
    }

    async fn pipeline(
        &self,
        prompt: &str,
        params: &Params,
        options: &RunOptions,
    ) -> Result<Vec<Output>, RunFailure> {
        let snapshot = self.document();
        let (backend, resolved) = self.resolve_prompt(&snapshot, prompt, params).await?;

        self.set_state(prompt, RunState::Dispatching);
        let request = self.build_request(backend.as_ref(), &resolved).await?;

        self.set_state(prompt, RunState::Running);
        let inference = InferenceOptions {
            stream: options.stream && backend.supports_streaming(),
            stream_callback: options.stream_callback.clone(),
        };
        if options.stream && !inference.stream {
            tracing::debug!("Backend '{}' does not stream; running buffered", backend.id());
        }

        self.emit(
            EventName::OnRunStart,
            EVENT_SOURCE,
            json!({ "prompt_name": prompt, "model": &resolved.model, "options": { "stream": inference.stream } }),
        )
        .await;

        let outputs = AssertUnwindSafe(backend.run(&resolved, request, &inference))
            .catch_unwind()
            .await
            .map_err(|payload| {
                RunFailure::Backend(AppError::Backend(format!(
                    "Backend '{}' panicked: {}",
                    backend.id(),
                    panic_message(payload.as_ref())
                )))
            })?
            .map_err(RunFailure::Backend)?;

        self.emit(
            EventName::OnRunEnd,
            EVENT_SOURCE,
            json!({ "prompt_name": prompt, "result": &outputs }),
        )
        .await;

        Ok(outputs)
    }

    /// Lookup the backend and resolve the prompt's dependency plan.
    async fn resolve_prompt(
        &self,
        snapshot: &Document,
        prompt: &str,
        params: &Params,
    ) -> AppResult<(Arc<dyn Backend>, ResolvedPrompt)> {
        self.emit(
            EventName::OnResolveStart,
            EVENT_SOURCE,
            json!({ "prompt_name": prompt, "params": params }),
        )
        .await;

        let target = snapshot.prompt(prompt)?;
        let model = snapshot.model_name_for(target);
        let (model, backend) = self.inner.registry.backend_for(model.as_deref(), snapshot)?;

        let plan = resolve_dependencies(snapshot, prompt, params, &|output: &Output| backend.output_text(output))?;
        let resolved = ResolvedPrompt {
            prompt: target.clone(),
            settings: snapshot.model_settings_for(target),
            params: binding_for(snapshot, target, params)?,
            model,
            plan,
        };

        self.emit(
            EventName::OnResolveEnd,
            EVENT_SOURCE,
            json!({
                "prompt_name": prompt,
                "model": &resolved.model,
                "resolved_input": &resolved.plan.target.resolved_input,
                "history_len": resolved.plan.history.len(),
            }),
        )
        .await;

        Ok((backend, resolved))
    }

    async fn build_request(&self, backend: &dyn Backend, resolved: &ResolvedPrompt) -> AppResult<BackendRequest> {
        self.emit(
            EventName::OnDeserializeStart,
            backend.id(),
            json!({ "prompt_name": &resolved.prompt.name, "params": &resolved.params }),
        )
        .await;

        let request = backend.deserialize(resolved).await?;

        self.emit(
            EventName::OnDeserializeEnd,
            backend.id(),
            json!({ "prompt_name": &resolved.prompt.name, "result": &request }),
        )
        .await;

        Ok(request)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("document", &self.inner.document.read().name)
            .field("backends", &self.inner.registry.names())
            .field("callbacks", &self.inner.callbacks)
            .finish()
    }
}
