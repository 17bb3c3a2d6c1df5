use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, Language, NamingRule, Placeholders,
    RunConfig,
};
use crate::types::{MountConfig, ResourceLimits};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../coderun.example.toml");

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "CODERUN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("confinement backend '{backend}' is unavailable: {message}")]
    ConfinementUnavailable { backend: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Mechanism confining child processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfinementKind {
    /// Process resource limits, cleared environment, workspace as cwd
    #[default]
    Rlimit,

    /// Resource limits plus a bubblewrap mount/pid/net namespace jail
    Bubblewrap,
}

/// Config for coderun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-execution workspaces are created.
    /// Defaults to the OS temporary directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of executions in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Seconds a request may queue for a free slot before it is rejected
    /// as overloaded. Zero rejects immediately.
    #[serde(default)]
    pub admission_wait: f64,

    /// Largest accepted source text in bytes
    #[serde(default = "default_max_source_size")]
    pub max_source_size: usize,

    /// Largest accepted stdin text in bytes
    #[serde(default = "default_max_stdin_size")]
    pub max_stdin_size: usize,

    /// How child processes are confined
    #[serde(default)]
    pub confinement: ConfinementKind,

    /// Path to the bubblewrap binary (uses PATH if not specified)
    #[serde(default)]
    pub bubblewrap_path: Option<PathBuf>,

    /// Extra mounts exposed inside the bubblewrap jail
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Explicit toolchain locations keyed by the program name used in
    /// command templates (e.g., `gcc = "/opt/gcc-13/bin/gcc"`). Programs not
    /// listed here are looked up on PATH.
    #[serde(default)]
    pub toolchains: HashMap<String, PathBuf>,

    /// Default resource limits applied to every run step.
    /// This will be overridden by language and request limits. A partial
    /// table only replaces the fields it names.
    #[serde(default, deserialize_with = "run_limits_over_defaults")]
    pub default_limits: ResourceLimits,

    /// Default resource limits applied to every compile step
    #[serde(
        default = "default_compile_limits",
        deserialize_with = "compile_limits_over_defaults"
    )]
    pub compile_limits: ResourceLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            workspace_root: None,
            max_concurrent: default_max_concurrent(),
            admission_wait: 0.0,
            max_source_size: default_max_source_size(),
            max_stdin_size: default_max_stdin_size(),
            confinement: ConfinementKind::default(),
            bubblewrap_path: None,
            sandbox_mounts: Vec::new(),
            toolchains: HashMap::new(),
            default_limits: ResourceLimits::default(),
            compile_limits: default_compile_limits(),
            languages: HashMap::new(),
        }
    }

    /// Directory under which workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// How long a request may wait for a slot, or None to reject immediately
    pub fn admission_wait(&self) -> Option<Duration> {
        (self.admission_wait.is_finite() && self.admission_wait > 0.0)
            .then(|| Duration::from_secs_f64(self.admission_wait))
    }

    /// Get the path to the bubblewrap binary
    pub fn bubblewrap_binary(&self) -> PathBuf {
        self.bubblewrap_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("bwrap"))
    }

    /// Limits for a run step: defaults, then the language's, then the request's
    pub fn run_limits(
        &self,
        language: Option<&ResourceLimits>,
        request: Option<&ResourceLimits>,
    ) -> ResourceLimits {
        layer(&self.default_limits, [language, request])
    }

    /// Limits for a compile step: compile defaults, then the language's
    pub fn compile_limits_for(&self, language: Option<&ResourceLimits>) -> ResourceLimits {
        layer(&self.compile_limits, [language])
    }
}

fn layer<const N: usize>(
    base: &ResourceLimits,
    overrides: [Option<&ResourceLimits>; N],
) -> ResourceLimits {
    overrides
        .into_iter()
        .flatten()
        .fold(base.clone(), |limits, next| limits.with_overrides(next))
}

fn run_limits_over_defaults<'de, D>(deserializer: D) -> Result<ResourceLimits, D::Error>
where
    D: Deserializer<'de>,
{
    let partial = ResourceLimits::deserialize(deserializer)?;
    Ok(ResourceLimits::default().with_overrides(&partial))
}

fn compile_limits_over_defaults<'de, D>(deserializer: D) -> Result<ResourceLimits, D::Error>
where
    D: Deserializer<'de>,
{
    let partial = ResourceLimits::deserialize(deserializer)?;
    Ok(default_compile_limits().with_overrides(&partial))
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_concurrent() -> usize {
    8
}

fn default_max_source_size() -> usize {
    256 * 1024
}

fn default_max_stdin_size() -> usize {
    1024 * 1024
}

/// Default compilation limits
pub(crate) fn default_compile_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Some(30.0),
        wall_time_limit: Some(30.0),
        memory_limit: None,
        stack_limit: None,
        max_processes: None,
        max_output: Some(256), // diagnostics beyond this are noise
        max_file_size: None,
        max_open_files: None,
    }
}
