//! Backend selection
//!
//! Which backend is active, how each one wants its source prepared, and when
//! a backend switch may overwrite the source buffer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of execution backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    #[serde(alias = "python", alias = "managed")]
    ManagedRuntime,

    #[serde(alias = "c", alias = "embedded")]
    EmbeddedInterpreter,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::ManagedRuntime, BackendKind::EmbeddedInterpreter];

    /// Source text as the backend should receive it
    ///
    /// The managed runtime is indentation sensitive, so its source is passed
    /// through untouched. The embedded interpreter gets a trimmed copy.
    pub fn prepare_source(self, source: &str) -> &str {
        match self {
            BackendKind::ManagedRuntime => source,
            BackendKind::EmbeddedInterpreter => source.trim(),
        }
    }

    /// Whether the source counts as empty, always judged on a trimmed view
    pub fn is_blank(source: &str) -> bool {
        source.trim().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::ManagedRuntime => "managed_runtime",
            BackendKind::EmbeddedInterpreter => "embedded_interpreter",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "managed_runtime" | "managed" | "python" | "py" => Ok(BackendKind::ManagedRuntime),
            "embedded_interpreter" | "embedded" | "c" => Ok(BackendKind::EmbeddedInterpreter),
            other => Err(format!(
                "unknown backend '{other}' (expected 'python' or 'c')"
            )),
        }
    }
}

/// Whether switching may replace the buffer with the new backend's template
///
/// Only an empty buffer or one still holding a known default template is
/// replaced. User-authored text is never overwritten.
pub fn should_reseed<'a>(current: &str, templates: impl IntoIterator<Item = &'a str>) -> bool {
    let current = current.trim();
    current.is_empty()
        || templates
            .into_iter()
            .any(|template| !template.trim().is_empty() && template.trim() == current)
}
