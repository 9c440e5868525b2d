//! Configuration file loading for runpad
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError, DRIVER_PLACEHOLDER};
use crate::types::RunLimits;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        if runtime.name.is_empty() {
            return Err(ConfigError::Invalid("runtime has empty name".to_owned()));
        }
        if runtime.command.is_empty() {
            return Err(ConfigError::Invalid("runtime has empty command".to_owned()));
        }
        if !runtime
            .command
            .iter()
            .any(|arg| arg.contains(DRIVER_PLACEHOLDER))
        {
            return Err(ConfigError::Invalid(format!(
                "runtime command must pass the driver script via {DRIVER_PLACEHOLDER}"
            )));
        }
        if runtime.startup_timeout <= 0.0
            || Duration::try_from_secs_f64(runtime.startup_timeout).is_err()
        {
            return Err(ConfigError::Invalid(
                "runtime startup_timeout must be a positive, finite number of seconds".to_owned(),
            ));
        }

        check_limits("limits", Some(&self.limits))?;
        check_limits("runtime.limits", runtime.limits.as_ref())?;

        let lang = &self.interpreter;
        if lang.name.is_empty() {
            return Err(ConfigError::Invalid("interpreter has empty name".to_owned()));
        }
        if lang.extension.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter has empty extension".to_owned(),
            ));
        }
        if lang.run.command.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter has empty run command".to_owned(),
            ));
        }
        if let Some(ref compile) = lang.compile
            && compile.command.is_empty()
        {
            return Err(ConfigError::Invalid(
                "interpreter has empty compile command".to_owned(),
            ));
        }
        check_limits("interpreter.run.limits", lang.run.limits.as_ref())?;
        if let Some(ref compile) = lang.compile {
            check_limits("interpreter.compile.limits", compile.limits.as_ref())?;
        }

        for example in &self.examples {
            if example.code.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "example '{}' has no code",
                    example.title
                )));
            }
        }

        Ok(())
    }
}

fn check_limits(scope: &str, limits: Option<&RunLimits>) -> Result<(), ConfigError> {
    match limits {
        Some(limits) => limits
            .check()
            .map_err(|reason| ConfigError::Invalid(format!("{scope}: {reason}"))),
        None => Ok(()),
    }
}
