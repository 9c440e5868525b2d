//! A library for running user code behind a single run button.
//!
//! Runpad drives one run at a time on one of two execution backends and
//! renders the result to an output sink. A [`RunController`] owns the run
//! status, reads a [`SourceBuffer`], and writes to an [`OutputSink`].
//!
//! # Features
//!
//! - **Managed runtime** - A persistent Python process, bootstrapped once and shared by every run.
//! - **Embedded interpreter** - Stateless compile-and-run of C programs with streamed output.
//! - **Single-flight runs** - Requests made while busy are ignored, never queued.
//! - **TOML configuration** - Backend commands, templates, limits and example snippets.
//! - **Resource limits** - Wall time and output size limits per backend.

pub use backend::{
    BackendProfile, ChunkSink, EmbeddedInterpreter, ExecutionBackend, ExecutionFault, InitError,
    ManagedRuntime, OutputBuffer,
};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Example, Language, RuntimeConfig};
pub use console::{ConsoleView, OutputSink, TerminalSink, split_lines, split_stream};
pub use controller::{
    AttachOptions, BackendKind, ControllerError, RunController, RunOutcome, RunReport,
};
pub use source::{SourceBuffer, TextBuffer};
pub use types::{ExecutionOutput, ExecutionResult, OutputLine, RunLimits, RunStatus, Severity};

pub mod backend;
pub mod config;
pub mod console;
pub mod controller;
pub mod source;
pub mod types;
