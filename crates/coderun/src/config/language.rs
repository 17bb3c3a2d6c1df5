use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// First public top-level type declaration, e.g. `public final class Solver`.
static PUBLIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*public\s+(?:(?:final|abstract|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("public type pattern should compile")
});

/// Configuration for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Alternative identifiers accepted for this language
    #[serde(default)]
    pub aliases: Vec<String>,

    /// How the `{name}` stem of source and artifact files is chosen
    #[serde(default)]
    pub naming: NamingRule,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the source file name for the given stem
    pub fn source_name(&self, stem: &str) -> String {
        match self.compile {
            Some(ref compile) => expand_name(&compile.source_name, stem),
            None => format!("{stem}.{}", self.extension),
        }
    }

    /// Get the compiled artifact name for the given stem
    pub fn output_name(&self, stem: &str) -> Option<String> {
        self.compile
            .as_ref()
            .map(|compile| expand_name(&compile.output_name, stem))
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], values: &Placeholders<'_>) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", values.source)
                    .replace("{output}", values.binary)
                    .replace("{binary}", values.binary)
                    .replace("{name}", values.name)
                    .replace("{workdir}", values.workdir)
            })
            .collect()
    }
}

/// Values substituted into command templates
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    /// `{source}`: source file name inside the workspace
    pub source: &'a str,
    /// `{output}` and `{binary}`: artifact name inside the workspace
    pub binary: &'a str,
    /// `{name}`: derived file stem
    pub name: &'a str,
    /// `{workdir}`: absolute workspace path
    pub workdir: &'a str,
}

fn expand_name(template: &str, stem: &str) -> String {
    template.replace("{name}", stem)
}

/// Rule for deriving the `{name}` stem from program text
///
/// Derivation is best effort. A stem that does not match what the toolchain
/// expects surfaces as a compile failure, never as a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum NamingRule {
    /// Always use the same stem
    Fixed {
        #[serde(default = "default_stem")]
        name: String,
    },

    /// Use the first public top-level type name (JVM style), else `fallback`
    PublicType {
        #[serde(default = "default_type_stem")]
        fallback: String,
    },
}

impl NamingRule {
    /// Derive the file stem for `source`
    pub fn derive(&self, source: &str) -> String {
        match self {
            NamingRule::Fixed { name } => name.clone(),
            NamingRule::PublicType { fallback } => PUBLIC_TYPE
                .captures(source)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_owned())
                .unwrap_or_else(|| fallback.clone()),
        }
    }

    /// The stem used when nothing can be derived
    pub fn fallback(&self) -> &str {
        match self {
            NamingRule::Fixed { name } => name,
            NamingRule::PublicType { fallback } => fallback,
        }
    }
}

impl Default for NamingRule {
    fn default() -> Self {
        NamingRule::Fixed {
            name: default_stem(),
        }
    }
}

fn default_stem() -> String {
    "main".to_owned()
}

fn default_type_stem() -> String {
    "Main".to_owned()
}

/// File extension without dot (e.g., "cpp")
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
    /// Placeholders: {source}, {output}, {name}, {workdir}
    pub command: Vec<String>,

    /// Source file name in the workspace (e.g., "main.cpp", "{name}.java")
    pub source_name: String,

    /// Artifact name (e.g., "main", "{name}.class")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides compile defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Default PATH for sandboxed processes
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}, {name}, {workdir}
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH environment variable for the child process
    ///
    /// Defaults to "/usr/local/bin:/usr/bin:/bin" if not specified.
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}
