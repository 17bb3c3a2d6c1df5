//! Configuration file loading for coderun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::collections::HashMap;
use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG, NamingRule};

impl Config {
    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path` (or the embedded example when `None`) and
    /// layer `CODERUN_*` environment variables on top.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CODERUN_DEFAULT_LIMITS__WALL_TIME_LIMIT=3`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder();
        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml)),
        };
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_owned(),
            ));
        }
        if self.default_limits.wall_time().is_none() {
            return Err(ConfigError::Invalid(
                "default_limits.wall_time_limit must be a positive number of seconds".to_owned(),
            ));
        }
        if self.default_limits.output_ceiling().is_none() {
            return Err(ConfigError::Invalid(
                "default_limits.max_output must be set".to_owned(),
            ));
        }
        if self.compile_limits.wall_time().is_none() {
            return Err(ConfigError::Invalid(
                "compile_limits.wall_time_limit must be a positive number of seconds".to_owned(),
            ));
        }

        let mut claimed: HashMap<String, &str> = self
            .languages
            .keys()
            .map(|id| (id.to_lowercase(), id.as_str()))
            .collect();

        // Validate all languages have required fields
        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if compile.source_name.is_empty() || compile.output_name.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' needs both source_name and output_name"
                    )));
                }
            }

            let stem = lang.naming.fallback();
            if stem.is_empty() || stem.contains('/') || stem.contains("..") {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has invalid naming stem '{stem}'"
                )));
            }
            if let NamingRule::Fixed { ref name } = lang.naming
                && name.starts_with('.')
            {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' uses a hidden file stem '{name}'"
                )));
            }

            for alias in &lang.aliases {
                let key = alias.to_lowercase();
                if let Some(owner) = claimed.insert(key, id.as_str())
                    && owner != id.as_str()
                {
                    return Err(ConfigError::Invalid(format!(
                        "alias '{alias}' of language '{id}' is already used by '{owner}'"
                    )));
                }
            }
        }

        Ok(())
    }
}
