use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::ExecutionFault;

/// Line shown when a run produced nothing at all
pub const NO_OUTPUT_MESSAGE: &str = "Code executed successfully (no output)";

/// Lifecycle state of the run controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    /// Nothing has happened yet, or the selected backend has not been warmed up
    #[default]
    Idle,

    /// The selected backend is bootstrapping
    Initializing,

    /// A run is in flight
    Running,

    /// Ready to accept a run
    Ready,

    /// The selected backend could not be initialized
    Failed,
}

impl RunStatus {
    /// Whether a run or bootstrap is in progress
    ///
    /// The run trigger is disabled while this is true.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, RunStatus::Initializing | RunStatus::Running)
    }

    /// Status text for the given backend
    pub fn display_text(&self, backend_name: &str, compiles: bool) -> String {
        match self {
            RunStatus::Idle => "Idle".to_owned(),
            RunStatus::Initializing => format!("Loading {backend_name}..."),
            RunStatus::Running if compiles => format!("Compiling & Running {backend_name}..."),
            RunStatus::Running => format!("Running {backend_name}..."),
            RunStatus::Ready => "Ready".to_owned(),
            RunStatus::Failed => "Failed to load".to_owned(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Idle => "idle",
            RunStatus::Initializing => "initializing",
            RunStatus::Running => "running",
            RunStatus::Ready => "ready",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Severity tag of a rendered line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

/// A single line of console output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    text: String,
    severity: Severity,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Success)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Error)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Output of a run that did not fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutput {
    /// Separately captured streams, plus the stringified value of a trailing
    /// expression if there was one
    Captured {
        stdout: String,
        stderr: String,
        value: Option<String>,
    },

    /// Output was delivered incrementally through the chunk sink
    Streamed,
}

/// Outcome of one call to a backend's `execute`
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Output(ExecutionOutput),
    Fault(ExecutionFault),
}

impl ExecutionResult {
    /// Check if the run completed without a fault
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Output(_))
    }

    /// Classify the result into console lines
    ///
    /// `streamed` holds whatever the backend pushed through the chunk sink.
    /// A fault discards any partial streamed output.
    pub fn into_lines(self, streamed: &str) -> Vec<OutputLine> {
        match self {
            ExecutionResult::Output(ExecutionOutput::Captured {
                stdout,
                stderr,
                value,
            }) => {
                if !stderr.is_empty() {
                    crate::console::split_lines(&stderr, Severity::Error)
                } else if !stdout.is_empty() {
                    crate::console::split_lines(&stdout, Severity::Success)
                } else if let Some(value) = value {
                    crate::console::split_lines(&value, Severity::Success)
                } else {
                    vec![OutputLine::success(NO_OUTPUT_MESSAGE)]
                }
            }
            ExecutionResult::Output(ExecutionOutput::Streamed) => {
                if streamed.is_empty() {
                    vec![OutputLine::success(NO_OUTPUT_MESSAGE)]
                } else {
                    crate::console::split_stream(streamed, Severity::Success)
                }
            }
            ExecutionResult::Fault(fault) => {
                crate::console::split_lines(&fault.to_string(), Severity::Error)
            }
        }
    }
}

/// Per-run limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Maximum streamed output in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,
}

impl RunLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create limits with nothing enforced
    pub fn unlimited() -> Self {
        Self {
            wall_time_limit: None,
            max_output: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another RunLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &RunLimits) -> RunLimits {
        RunLimits {
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            max_output: overrides.max_output.or(self.max_output),
        }
    }

    /// Wall time limit as a duration, if set, positive and representable
    pub fn wall_time(&self) -> Option<std::time::Duration> {
        self.wall_time_limit
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| std::time::Duration::try_from_secs_f64(secs).ok())
    }

    /// Check that every limit set is a usable number
    pub fn check(&self) -> Result<(), String> {
        if let Some(secs) = self.wall_time_limit
            && std::time::Duration::try_from_secs_f64(secs).is_err()
        {
            return Err(format!("wall_time_limit {secs} is not a valid duration"));
        }
        Ok(())
    }

    /// Output cap in bytes, if set
    pub fn max_output_bytes(&self) -> Option<usize> {
        self.max_output
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            wall_time_limit: Some(10.0),
            max_output: Some(4 * Self::MB), // 4 MB
        }
    }
}
