use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::backend::BackendProfile;
use crate::config::ConfigError;
use crate::types::RunLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholder replaced with the runtime driver script
pub const DRIVER_PLACEHOLDER: &str = "{driver}";

/// Configuration for the managed runtime backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Human-readable name (e.g., "Python")
    pub name: String,

    /// Language mode tag handed to the source buffer
    pub mode: String,

    /// Command that starts the runtime. Placeholders: {driver}
    pub command: Vec<String>,

    /// Environment variables to set for the runtime process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Seconds to wait for the runtime's ready handshake
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: f64,

    /// Default source text for a fresh buffer
    #[serde(default)]
    pub template: String,

    /// Limits for each run (overrides the global limits)
    #[serde(default)]
    pub limits: Option<RunLimits>,
}

impl RuntimeConfig {
    /// Expand the driver placeholder in the runtime command
    pub fn expand_command(&self, driver: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(DRIVER_PLACEHOLDER, driver))
            .collect()
    }

    pub fn profile(&self) -> BackendProfile {
        BackendProfile {
            name: self.name.clone(),
            mode: self.mode.clone(),
            template: self.template.clone(),
            compiles: false,
        }
    }
}

fn default_startup_timeout() -> f64 {
    15.0
}

/// Configuration for the embedded interpreter backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C")
    pub name: String,

    /// Language mode tag handed to the source buffer
    pub mode: String,

    /// File extension
    pub extension: FileExtension,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Default source text for a fresh buffer
    #[serde(default)]
    pub template: String,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the source file name for this language
    pub fn source_name(&self) -> String {
        if let Some(ref compile) = self.compile {
            compile.source_name.clone()
        } else {
            format!("main.{}", self.extension)
        }
    }

    /// Name of the file the run command should execute
    pub fn binary_name(&self) -> String {
        match self.compile {
            Some(ref compile) => compile.output_name.clone(),
            None => self.source_name(),
        }
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str, binary: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", binary)
                    .replace("{binary}", binary)
            })
            .collect()
    }

    pub fn profile(&self) -> BackendProfile {
        BackendProfile {
            name: self.name.clone(),
            mode: self.mode.clone(),
            template: self.template.clone(),
            compiles: self.is_compiled(),
        }
    }
}

/// File extension without dot (e.g., "c")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}
    pub command: Vec<String>,

    /// Source file name in the scratch directory (e.g., "main.c")
    pub source_name: String,

    /// Output binary name (e.g., "main")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Limits for compilation (overrides the global limits)
    #[serde(default)]
    pub limits: Option<RunLimits>,
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Limits for execution (overrides the global limits)
    #[serde(default)]
    pub limits: Option<RunLimits>,
}
