//! Run-lifecycle controller
//!
//! Mediates between the run trigger, the two execution backends, the source
//! buffer and the output sink. It is the only owner of [`RunStatus`].
//!
//! ```text
//! Idle ──► Initializing ──► Ready
//! Idle/Ready ──► Running ──► Ready
//! Initializing ──► Failed        (bootstrap failure, latched)
//! ```
//!
//! At most one run is in flight. The busy check and the transition out of
//! `Idle`/`Ready` happen under the same lock, so a second request that arrives
//! while busy is ignored rather than queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

pub use crate::controller::selector::{BackendKind, should_reseed};

use crate::backend::{
    BackendProfile, ChunkSink, EmbeddedInterpreter, ExecutionBackend, InitError, ManagedRuntime,
    OutputBuffer,
};
use crate::config::{Config, Example};
use crate::console::OutputSink;
use crate::source::SourceBuffer;
use crate::types::{ExecutionResult, OutputLine, RunStatus};

mod selector;

/// Line shown when the user runs a blank buffer
pub fn empty_input_message(backend_name: &str) -> String {
    format!("Please enter some {backend_name} code to run.")
}

/// Status text shown after a run faulted, until the status is next updated
pub const FAULT_STATUS_TEXT: &str = "Error";

/// Line shown when a backend could not be bootstrapped
pub fn init_failure_message(backend_name: &str) -> String {
    format!("Error: Failed to initialize {backend_name} runtime. Please reload and try again.")
}

/// Errors returned by controller operations that can be refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("a run is in progress")]
    Busy,

    #[error("controller has been disposed")]
    Disposed,

    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
}

/// How a controller takes over its collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOptions {
    /// Fill a blank source buffer with the selected backend's template
    pub seed_template: bool,

    /// Show the placeholder in the output sink right away
    pub show_placeholder: bool,
}

impl AttachOptions {
    /// For a one-shot run of source that was handed in whole
    ///
    /// A blank buffer stays blank so it is reported as empty input.
    pub fn one_shot() -> Self {
        Self {
            seed_template: false,
            show_placeholder: false,
        }
    }
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            seed_template: true,
            show_placeholder: true,
        }
    }
}

/// What a settled run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Backend that ran the code
    pub backend: BackendKind,

    /// Lines rendered to the output sink
    pub lines: Vec<OutputLine>,

    /// Whether the backend reported a fault
    pub faulted: bool,
}

/// Result of a run request
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run settled and its output was rendered
    Completed(RunReport),

    /// The controller was busy (or disposed); nothing happened
    Ignored,

    /// The source was blank; no backend was invoked
    EmptyInput,

    /// The backend could not be bootstrapped; no code was executed
    InitFailed(InitError),
}

struct ControllerState {
    selection: BackendKind,
    status: RunStatus,
    /// The last run faulted and nothing has happened since
    faulted: bool,
    init_failures: HashMap<BackendKind, InitError>,
    sink: Box<dyn OutputSink>,
    buffer: Box<dyn SourceBuffer>,
    examples: Vec<Example>,
    warmup: Option<JoinHandle<()>>,
    disposed: bool,
}

impl ControllerState {
    fn render(&mut self, lines: &[OutputLine]) {
        if let Err(e) = self.sink.render(lines) {
            warn!(%e, "failed to render output");
        }
    }

    fn render_placeholder(&mut self) {
        if let Err(e) = self.sink.render_placeholder() {
            warn!(%e, "failed to render placeholder");
        }
    }
}

struct Inner<M, E> {
    managed: M,
    embedded: E,
    state: Mutex<ControllerState>,
    status_tx: watch::Sender<RunStatus>,
}

impl<M, E> Inner<M, E>
where
    M: ExecutionBackend,
    E: ExecutionBackend,
{
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, state: &mut ControllerState, status: RunStatus) {
        if state.status != status {
            debug!(from = %state.status, to = %status, "status change");
        }
        state.status = status;
        state.faulted = false;
        self.status_tx.send_replace(status);
    }

    fn profile(&self, kind: BackendKind) -> &BackendProfile {
        match kind {
            BackendKind::ManagedRuntime => self.managed.profile(),
            BackendKind::EmbeddedInterpreter => self.embedded.profile(),
        }
    }

    fn is_prepared(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::ManagedRuntime => self.managed.is_prepared(),
            BackendKind::EmbeddedInterpreter => self.embedded.is_prepared(),
        }
    }

    async fn prepare(&self, kind: BackendKind) -> Result<(), InitError> {
        match kind {
            BackendKind::ManagedRuntime => self.managed.prepare().await,
            BackendKind::EmbeddedInterpreter => self.embedded.prepare().await,
        }
    }

    async fn execute(
        &self,
        kind: BackendKind,
        source: &str,
        sink: &mut dyn ChunkSink,
    ) -> ExecutionResult {
        match kind {
            BackendKind::ManagedRuntime => self.managed.execute(source, sink).await,
            BackendKind::EmbeddedInterpreter => self.embedded.execute(source, sink).await,
        }
    }

    /// Record a failed bootstrap and surface it if `kind` is selected
    fn fail_initialization(&self, state: &mut ControllerState, kind: BackendKind, err: &InitError) {
        warn!(backend = %kind, %err, "backend initialization failed");
        state.init_failures.insert(kind, err.clone());
        if state.selection == kind {
            self.set_status(state, RunStatus::Failed);
            let line = OutputLine::error(init_failure_message(&self.profile(kind).name));
            state.render(&[line]);
        }
    }

    /// Apply the result of the background warm-up
    fn warmup_settled(&self, kind: BackendKind, result: Result<(), InitError>) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }

        match result {
            Ok(()) => {
                info!(backend = %kind, "backend warmed up");
                state.init_failures.remove(&kind);
                if state.selection == kind && state.status == RunStatus::Idle {
                    self.set_status(&mut state, RunStatus::Ready);
                }
            }
            // A run awaiting the same bootstrap reports the failure itself
            Err(err) if state.status.is_busy() => {
                state.init_failures.insert(kind, err);
            }
            Err(err) => self.fail_initialization(&mut state, kind, &err),
        }
    }
}

/// Settles the status if a run or retry is dropped before it finishes
///
/// Restores `Ready` when the backend came up and `Idle` when it did not, so a
/// cancelled future never leaves the controller busy.
struct SettleOnDrop<'a, M, E>
where
    M: ExecutionBackend,
    E: ExecutionBackend,
{
    inner: &'a Inner<M, E>,
    kind: BackendKind,
    armed: bool,
}

impl<'a, M, E> SettleOnDrop<'a, M, E>
where
    M: ExecutionBackend,
    E: ExecutionBackend,
{
    fn new(inner: &'a Inner<M, E>, kind: BackendKind) -> Self {
        Self {
            inner,
            kind,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<M, E> Drop for SettleOnDrop<'_, M, E>
where
    M: ExecutionBackend,
    E: ExecutionBackend,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.inner.lock();
        if !state.status.is_busy() {
            return;
        }
        let status = if self.inner.is_prepared(self.kind) {
            RunStatus::Ready
        } else {
            RunStatus::Idle
        };
        warn!(backend = %self.kind, %status, "run abandoned before it settled");
        self.inner.set_status(&mut state, status);
    }
}

/// Handle to a run controller
///
/// Cloning yields another handle to the same controller.
pub struct RunController<M = ManagedRuntime, E = EmbeddedInterpreter> {
    inner: Arc<Inner<M, E>>,
}

impl<M, E> Clone for RunController<M, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl RunController<ManagedRuntime, EmbeddedInterpreter> {
    /// Build both backends, the selection and the examples from configuration
    pub fn from_config(
        config: &Config,
        sink: impl OutputSink + 'static,
        buffer: impl SourceBuffer + 'static,
    ) -> Self {
        Self::from_config_with(config, sink, buffer, AttachOptions::default())
    }

    /// Like [`RunController::from_config`], attaching with `options`
    pub fn from_config_with(
        config: &Config,
        sink: impl OutputSink + 'static,
        buffer: impl SourceBuffer + 'static,
        options: AttachOptions,
    ) -> Self {
        Self::with_options(
            ManagedRuntime::from_config(config),
            EmbeddedInterpreter::from_config(config),
            sink,
            buffer,
            config.default_backend,
            options,
        )
        .with_examples(config.examples.clone())
    }
}

impl<M, E> RunController<M, E>
where
    M: ExecutionBackend,
    E: ExecutionBackend,
{
    /// Create a controller in the `Idle` state
    ///
    /// The sink shows its placeholder. A blank buffer is seeded with the
    /// selected backend's template.
    pub fn new(
        managed: M,
        embedded: E,
        sink: impl OutputSink + 'static,
        buffer: impl SourceBuffer + 'static,
        selection: BackendKind,
    ) -> Self {
        Self::with_options(
            managed,
            embedded,
            sink,
            buffer,
            selection,
            AttachOptions::default(),
        )
    }

    /// Create a controller in the `Idle` state, attaching with `options`
    pub fn with_options(
        managed: M,
        embedded: E,
        sink: impl OutputSink + 'static,
        buffer: impl SourceBuffer + 'static,
        selection: BackendKind,
        options: AttachOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        let mut state = ControllerState {
            selection,
            status: RunStatus::Idle,
            faulted: false,
            init_failures: HashMap::new(),
            sink: Box::new(sink),
            buffer: Box::new(buffer),
            examples: Vec::new(),
            warmup: None,
            disposed: false,
        };

        let profile = match selection {
            BackendKind::ManagedRuntime => managed.profile(),
            BackendKind::EmbeddedInterpreter => embedded.profile(),
        };
        state.buffer.set_language_mode(&profile.mode);
        if options.seed_template
            && BackendKind::is_blank(&state.buffer.get_value())
            && !profile.template.is_empty()
        {
            state.buffer.set_value(&profile.template);
        }
        if options.show_placeholder {
            state.render_placeholder();
        }

        Self {
            inner: Arc::new(Inner {
                managed,
                embedded,
                state: Mutex::new(state),
                status_tx,
            }),
        }
    }

    /// Replace the example snippets offered to the user
    pub fn with_examples(self, examples: Vec<Example>) -> Self {
        self.inner.lock().examples = examples;
        self
    }

    /// Start warming up the managed runtime in the background
    ///
    /// Does not change the status or block. When the bootstrap settles the
    /// controller moves to `Ready`, or to `Failed` if it failed. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) {
        let kind = BackendKind::ManagedRuntime;
        let mut state = self.inner.lock();
        if state.disposed || state.warmup.is_some() || self.inner.is_prepared(kind) {
            return;
        }

        debug!(backend = %kind, "starting background warm-up");
        let inner = self.inner.clone();
        state.warmup = Some(tokio::spawn(async move {
            let result = inner.prepare(kind).await;
            inner.warmup_settled(kind, result);
        }));
    }

    /// Run the source buffer on the selected backend
    ///
    /// Never fails: every backend fault is rendered as error lines and
    /// reported in the returned outcome.
    #[instrument(skip(self))]
    pub async fn run(&self) -> RunOutcome {
        let inner = &self.inner;

        let (kind, source, needs_prepare) = {
            let mut state = inner.lock();
            if state.disposed || state.status.is_busy() {
                debug!(status = %state.status, "run request ignored");
                return RunOutcome::Ignored;
            }

            let kind = state.selection;
            let name = inner.profile(kind).name.clone();
            let raw = state.buffer.get_value();

            if BackendKind::is_blank(&raw) {
                state.render(&[OutputLine::error(empty_input_message(&name))]);
                return RunOutcome::EmptyInput;
            }

            if let Some(err) = state.init_failures.get(&kind).cloned() {
                debug!(backend = %kind, "run refused, initialization failed earlier");
                state.render(&[OutputLine::error(init_failure_message(&name))]);
                return RunOutcome::InitFailed(err);
            }

            let needs_prepare = !inner.is_prepared(kind);
            let next = if needs_prepare {
                RunStatus::Initializing
            } else {
                RunStatus::Running
            };
            inner.set_status(&mut state, next);

            (kind, kind.prepare_source(&raw).to_owned(), needs_prepare)
        };
        let mut settle = SettleOnDrop::new(inner, kind);

        if needs_prepare {
            let prepared = inner.prepare(kind).await;
            let mut state = inner.lock();
            if let Err(err) = prepared {
                settle.disarm();
                inner.fail_initialization(&mut state, kind, &err);
                return RunOutcome::InitFailed(err);
            }
            inner.set_status(&mut state, RunStatus::Running);
        }

        let mut streamed = OutputBuffer::new();
        let result = inner.execute(kind, &source, &mut streamed).await;
        let faulted = !result.is_success();
        let lines = result.into_lines(streamed.as_str());

        let mut state = inner.lock();
        settle.disarm();
        inner.set_status(&mut state, RunStatus::Ready);
        state.faulted = faulted;
        state.render(&lines);

        debug!(backend = %kind, faulted, lines = lines.len(), "run settled");

        RunOutcome::Completed(RunReport {
            backend: kind,
            lines,
            faulted,
        })
    }

    /// Select another backend
    ///
    /// Refused while busy. Resets the status, shows the placeholder and, if
    /// the buffer is empty or still holds a default template, seeds it with
    /// the new backend's template.
    pub fn switch_backend(&self, kind: BackendKind) -> Result<(), ControllerError> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.disposed {
            return Err(ControllerError::Disposed);
        }
        if state.status.is_busy() {
            debug!(to = %kind, "backend switch refused while busy");
            return Err(ControllerError::Busy);
        }

        let previous = state.selection;
        state.selection = kind;

        let status = if state.init_failures.contains_key(&kind) {
            RunStatus::Failed
        } else if inner.is_prepared(kind) {
            RunStatus::Ready
        } else {
            RunStatus::Idle
        };
        inner.set_status(&mut state, status);
        state.render_placeholder();

        let profile = inner.profile(kind);
        let templates = [
            inner.profile(previous).template.as_str(),
            profile.template.as_str(),
        ];
        state.buffer.set_language_mode(&profile.mode);
        if should_reseed(&state.buffer.get_value(), templates) {
            state.buffer.set_value(&profile.template);
        }

        info!(from = %previous, to = %kind, "switched backend");
        Ok(())
    }

    /// Re-attempt the bootstrap of the selected backend
    ///
    /// This is the only way out of a latched initialization failure.
    pub async fn retry_initialization(&self) -> Result<(), ControllerError> {
        let inner = &self.inner;
        let kind = {
            let mut state = inner.lock();
            if state.disposed {
                return Err(ControllerError::Disposed);
            }
            if state.status.is_busy() {
                return Err(ControllerError::Busy);
            }
            let kind = state.selection;
            state.init_failures.remove(&kind);
            inner.set_status(&mut state, RunStatus::Initializing);
            kind
        };

        info!(backend = %kind, "retrying initialization");
        let mut settle = SettleOnDrop::new(inner, kind);
        let prepared = inner.prepare(kind).await;

        let mut state = inner.lock();
        settle.disarm();
        match prepared {
            Ok(()) => {
                inner.set_status(&mut state, RunStatus::Ready);
                Ok(())
            }
            Err(err) => {
                inner.fail_initialization(&mut state, kind, &err);
                Err(err.into())
            }
        }
    }

    /// Empty the source buffer and focus it
    pub fn clear_source(&self) {
        let mut state = self.inner.lock();
        state.buffer.set_value("");
        state.buffer.focus();
    }

    /// Replace the source buffer with `code` and focus it
    pub fn load_example(&self, code: &str) {
        let mut state = self.inner.lock();
        state.buffer.set_value(code);
        state.buffer.focus();
    }

    /// Examples written for the selected backend
    pub fn examples(&self) -> Vec<Example> {
        let state = self.inner.lock();
        state
            .examples
            .iter()
            .filter(|example| example.backend == state.selection)
            .cloned()
            .collect()
    }

    /// Current source buffer content
    pub fn source(&self) -> String {
        self.inner.lock().buffer.get_value()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.lock().status
    }

    /// Whether the run trigger should be disabled
    pub fn is_busy(&self) -> bool {
        self.status().is_busy()
    }

    /// Status text for the selected backend
    ///
    /// Reads [`FAULT_STATUS_TEXT`] after a faulted run. The status itself is
    /// already `Ready` again.
    pub fn status_text(&self) -> String {
        let state = self.inner.lock();
        if state.faulted {
            return FAULT_STATUS_TEXT.to_owned();
        }
        let profile = self.inner.profile(state.selection);
        state.status.display_text(&profile.name, profile.compiles)
    }

    pub fn selection(&self) -> BackendKind {
        self.inner.lock().selection
    }

    /// Latched initialization failure of the selected backend, if any
    pub fn init_failure(&self) -> Option<InitError> {
        let state = self.inner.lock();
        state.init_failures.get(&state.selection).cloned()
    }

    pub fn profile(&self, kind: BackendKind) -> BackendProfile {
        self.inner.profile(kind).clone()
    }

    /// Observe status changes
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn managed(&self) -> &M {
        &self.inner.managed
    }

    pub fn embedded(&self) -> &E {
        &self.inner.embedded
    }

    /// Stop the warm-up and release both backends
    ///
    /// Later run requests are ignored.
    pub async fn dispose(&self) {
        let warmup = {
            let mut state = self.inner.lock();
            state.disposed = true;
            state.warmup.take()
        };
        if let Some(warmup) = warmup {
            warmup.abort();
        }

        self.inner.managed.dispose().await;
        self.inner.embedded.dispose().await;
        info!("controller disposed");
    }
}
