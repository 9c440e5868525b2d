//! Execution backends
//!
//! A backend turns source text into an [`ExecutionResult`]. Two variants exist:
//! the [`ManagedRuntime`], a stateful runtime that needs a one-time async
//! bootstrap and captures stdout/stderr separately, and the
//! [`EmbeddedInterpreter`], which is stateless per call and streams a single
//! output stream through a [`ChunkSink`].
//!
//! Backends never touch the output sink. Everything they produce flows back to
//! the run controller as a value.

use std::future::Future;

use thiserror::Error;

pub use crate::backend::bootstrap::SharedBootstrap;
pub use crate::backend::interpreter::EmbeddedInterpreter;
pub use crate::backend::runtime::ManagedRuntime;
use crate::types::ExecutionResult;

mod bootstrap;
mod interpreter;
mod runtime;

/// Errors that occur while bootstrapping a backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InitError {
    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),

    #[error("failed to spawn runtime: {0}")]
    Spawn(String),

    #[error("runtime did not become ready within {0:.1}s")]
    StartupTimeout(f64),

    #[error("runtime handshake failed: {0}")]
    Handshake(String),

    #[error("runtime exited during startup")]
    Exited,
}

/// A fault raised while running user code
///
/// Faults are always values by the time the controller sees them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionFault {
    /// An exception raised by the managed runtime, rendered verbatim
    #[error("{0}")]
    Raised(String),

    /// A compile or runtime fault reported by the embedded interpreter
    #[error("Error: {0}")]
    Interpreter(String),

    #[error("Error: execution timed out after {0:.1}s")]
    TimedOut(f64),

    #[error("Error: output limit of {0} KB exceeded")]
    OutputLimit(u64),

    /// The backend itself broke down (process died, protocol error)
    #[error("Error: {0}")]
    Transport(String),
}

/// Static description of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    /// Display name (e.g., "Python")
    pub name: String,

    /// Language mode tag handed to the source buffer
    pub mode: String,

    /// Default source text
    pub template: String,

    /// Whether the backend compiles before running
    pub compiles: bool,
}

/// Receiver for incrementally delivered output
pub trait ChunkSink: Send {
    fn write(&mut self, chunk: &str);
}

impl<F> ChunkSink for F
where
    F: FnMut(&str) + Send,
{
    fn write(&mut self, chunk: &str) {
        self(chunk)
    }
}

/// Accumulates streamed chunks for a single run
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl ChunkSink for OutputBuffer {
    fn write(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }
}

/// Capability every execution backend provides
pub trait ExecutionBackend: Send + Sync + 'static {
    /// Static description of this backend
    fn profile(&self) -> &BackendProfile;

    /// Whether `execute` can be called without bootstrapping first
    fn is_prepared(&self) -> bool {
        true
    }

    /// Bootstrap the backend
    ///
    /// Idempotent. Concurrent callers join the same in-flight bootstrap.
    fn prepare(&self) -> impl Future<Output = Result<(), InitError>> + Send {
        async { Ok(()) }
    }

    /// Run `source`, delivering streamed output to `sink`
    fn execute(
        &self,
        source: &str,
        sink: &mut dyn ChunkSink,
    ) -> impl Future<Output = ExecutionResult> + Send;

    /// Release private resources
    fn dispose(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Resolve the program in a command to an absolute path using the host's PATH.
///
/// Commands that already contain a `/` (like `./main` or `/usr/bin/cc`) are
/// left unchanged. Returns the missing program name on failure.
pub fn resolve_command(command: &mut [String]) -> Result<(), String> {
    let first = match command.first_mut() {
        Some(first) => first,
        None => return Ok(()),
    };

    if first.contains('/') {
        return Ok(());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = std::path::Path::new(dir).join(&*first);
        if candidate.is_file() {
            *first = candidate.to_string_lossy().into_owned();
            return Ok(());
        }
    }

    Err(first.clone())
}
