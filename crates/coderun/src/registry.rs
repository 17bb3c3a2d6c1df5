//! Language adapter registry
//!
//! Built once at engine start-up from the configured languages. Each
//! adapter's toolchain programs are resolved here, so a missing compiler or
//! interpreter is known before any request arrives.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, Language};

/// Why a language identifier cannot be served
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("toolchain for '{language}' is unavailable: '{program}' not found")]
    ToolchainUnavailable { language: String, program: String },
}

/// Where the first word of a command template points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStatus {
    /// A host toolchain binary
    Found { program: String, path: PathBuf },

    /// Could not be located on the host
    Missing { program: String },

    /// A file produced inside the workspace (e.g. `./{binary}`)
    Workspace { program: String },
}

impl ProgramStatus {
    pub fn program(&self) -> &str {
        match self {
            ProgramStatus::Found { program, .. }
            | ProgramStatus::Missing { program }
            | ProgramStatus::Workspace { program } => program,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ProgramStatus::Missing { .. })
    }
}

/// Resolve a template's program against the configured toolchains, then PATH
fn resolve_program(program: &str, toolchains: &HashMap<String, PathBuf>) -> ProgramStatus {
    let owned = program.to_owned();
    if program.starts_with("./") || program.contains('{') {
        return ProgramStatus::Workspace { program: owned };
    }

    if let Some(path) = toolchains.get(program) {
        return if path.exists() {
            ProgramStatus::Found {
                program: owned,
                path: path.clone(),
            }
        } else {
            warn!(program, path = %path.display(), "configured toolchain path does not exist");
            ProgramStatus::Missing { program: owned }
        };
    }

    if program.contains('/') {
        let path = Path::new(program);
        return if path.is_absolute() && path.exists() {
            ProgramStatus::Found {
                program: owned,
                path: path.to_path_buf(),
            }
        } else {
            ProgramStatus::Missing { program: owned }
        };
    }

    match which::which(program) {
        Ok(path) => ProgramStatus::Found {
            program: owned,
            path,
        },
        Err(_) => ProgramStatus::Missing { program: owned },
    }
}

/// Replace the program of a command template with its resolved path
fn bind_program(template: &[String], status: &ProgramStatus) -> Vec<String> {
    let mut command = template.to_vec();
    if let (Some(first), ProgramStatus::Found { path, .. }) = (command.first_mut(), status) {
        *first = path.to_string_lossy().into_owned();
    }
    command
}

/// A configured language with its toolchain resolved
#[derive(Debug, Clone)]
pub struct Adapter {
    id: String,
    language: Language,
    compile_program: Option<ProgramStatus>,
    run_program: ProgramStatus,
    compile_command: Option<Vec<String>>,
    run_command: Vec<String>,
}

impl Adapter {
    fn new(id: &str, language: &Language, toolchains: &HashMap<String, PathBuf>) -> Self {
        let compile_program = language
            .compile
            .as_ref()
            .and_then(|compile| compile.command.first())
            .map(|program| resolve_program(program, toolchains));
        let run_program = resolve_program(
            language.run.command.first().map_or("", String::as_str),
            toolchains,
        );

        let compile_command = match (language.compile.as_ref(), compile_program.as_ref()) {
            (Some(compile), Some(status)) => Some(bind_program(&compile.command, status)),
            _ => None,
        };
        let run_command = bind_program(&language.run.command, &run_program);

        Self {
            id: id.to_owned(),
            language: language.clone(),
            compile_program,
            run_program,
            compile_command,
            run_command,
        }
    }

    /// Canonical language identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn name(&self) -> &str {
        &self.language.name
    }

    pub fn is_compiled(&self) -> bool {
        self.language.is_compiled()
    }

    /// Compile command template with the compiler resolved to a host path
    pub fn compile_command(&self) -> Option<&[String]> {
        self.compile_command.as_deref()
    }

    /// Run command template with the interpreter resolved to a host path
    pub fn run_command(&self) -> &[String] {
        &self.run_command
    }

    /// Whether the run step starts a host toolchain rather than a built artifact
    pub fn runs_host_program(&self) -> bool {
        matches!(self.run_program, ProgramStatus::Found { .. })
    }

    /// Name of the run program, as written in the template
    pub fn run_program(&self) -> &str {
        self.run_program.program()
    }

    /// First toolchain program that could not be located
    pub fn missing_program(&self) -> Option<&str> {
        self.compile_program
            .iter()
            .chain(std::iter::once(&self.run_program))
            .find(|status| status.is_missing())
            .map(ProgramStatus::program)
    }

    pub fn is_available(&self) -> bool {
        self.missing_program().is_none()
    }

    /// Resolution status of every program this adapter starts
    pub fn programs(&self) -> Vec<&ProgramStatus> {
        self.compile_program
            .iter()
            .chain(std::iter::once(&self.run_program))
            .collect()
    }
}

/// Every configured adapter, keyed by canonical id
#[derive(Debug, Clone, Default)]
pub struct Registry {
    adapters: BTreeMap<String, Adapter>,
    aliases: HashMap<String, String>,
}

impl Registry {
    /// Build the registry, resolving every adapter's toolchain
    pub fn from_config(config: &Config) -> Self {
        let mut adapters = BTreeMap::new();
        let mut aliases = HashMap::new();

        for (id, language) in &config.languages {
            let key = id.to_lowercase();
            let adapter = Adapter::new(&key, language, &config.toolchains);
            match adapter.missing_program() {
                Some(program) => warn!(language = %key, program, "toolchain unavailable"),
                None => debug!(language = %key, "adapter ready"),
            }
            for alias in &language.aliases {
                aliases.insert(alias.to_lowercase(), key.clone());
            }
            adapters.insert(key, adapter);
        }

        Self { adapters, aliases }
    }

    /// Find the adapter for an identifier or alias (case-insensitive)
    pub fn find(&self, id: &str) -> Option<&Adapter> {
        let wanted = id.trim().to_lowercase();
        self.adapters.get(&wanted).or_else(|| {
            self.aliases
                .get(&wanted)
                .and_then(|canonical| self.adapters.get(canonical))
        })
    }

    /// Find an adapter that can serve requests right now
    pub fn lookup(&self, id: &str) -> Result<&Adapter, LookupError> {
        let adapter = self
            .find(id)
            .ok_or_else(|| LookupError::UnsupportedLanguage(id.to_owned()))?;
        match adapter.missing_program() {
            Some(program) => Err(LookupError::ToolchainUnavailable {
                language: adapter.id().to_owned(),
                program: program.to_owned(),
            }),
            None => Ok(adapter),
        }
    }

    /// All adapters in id order
    pub fn adapters(&self) -> impl Iterator<Item = &Adapter> {
        self.adapters.values()
    }

    /// Per-adapter toolchain resolution, in id order
    pub fn report(&self) -> Vec<(&str, Vec<&ProgramStatus>)> {
        self.adapters
            .values()
            .map(|adapter| (adapter.id(), adapter.programs()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
