use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DRIVER_PLACEHOLDER, FileExtension, Language, RunConfig, RuntimeConfig,
};
use crate::controller::BackendKind;
use crate::types::RunLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../runpad.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A canned snippet the user can load into the source buffer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Example {
    /// Backend the snippet is written for
    pub backend: BackendKind,

    /// Short title shown in listings
    pub title: String,

    /// Source text
    pub code: String,
}

/// Config for runpad
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend selected when a session starts
    #[serde(default)]
    pub default_backend: BackendKind,

    /// Limits applied to every run unless a backend overrides them
    #[serde(default)]
    pub limits: RunLimits,

    /// Managed runtime backend
    pub runtime: RuntimeConfig,

    /// Embedded interpreter backend
    pub interpreter: Language,

    /// Example snippets for both backends
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Config {
    /// Effective limits for the managed runtime
    pub fn runtime_limits(&self) -> RunLimits {
        self.effective_limits(self.runtime.limits.as_ref())
    }

    /// Merge limits with the global defaults
    pub fn effective_limits(&self, overrides: Option<&RunLimits>) -> RunLimits {
        match overrides {
            Some(limits) => self.limits.with_overrides(limits),
            None => self.limits.clone(),
        }
    }

    /// Examples written for the given backend, in configuration order
    pub fn examples_for(&self, backend: BackendKind) -> impl Iterator<Item = &Example> {
        self.examples.iter().filter(move |e| e.backend == backend)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}
