//! Execution coordinator for coderun
//!
//! Drives one request through validation, admission, workspace provisioning,
//! the optional compile step, and the run step, and always releases the
//! workspace before handing back an [`Outcome`].

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub use crate::runner::admission::{Slot, SlotPool};
pub use crate::runner::compile::CompileOutcome;
pub use crate::runner::state::{ExecutionState, StateObserver};

mod admission;
mod compile;
mod execute;
mod state;

use crate::config::{Config, ConfigError, Language, Placeholders};
use crate::registry::{Adapter, LookupError, Registry};
use crate::runner::execute::{RunVerdict, judge, normalize_stdin};
use crate::runner::state::StateTracker;
use crate::sandbox::{
    Confinement, ProcessCommand, SandboxError, Workspace, build_confinement, elapsed_ms,
};
use crate::types::{ExecutionRequest, Outcome, Phase, ResourceLimits};

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler '{program}' could not be started: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Every way a request can fail to produce a program result
///
/// Each variant maps onto exactly one [`Outcome`] status.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("toolchain for '{language}' is unavailable: '{program}' not found")]
    ToolchainUnavailable { language: String, program: String },

    #[error("all {0} execution slots are busy")]
    Overloaded(usize),

    #[error("execution cancelled")]
    Cancelled,

    #[error("compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("program could not be started: {0}")]
    SpawnFailed(String),
}

impl From<LookupError> for ExecuteError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::UnsupportedLanguage(language) => ExecuteError::UnsupportedLanguage(language),
            LookupError::ToolchainUnavailable { language, program } => {
                ExecuteError::ToolchainUnavailable { language, program }
            }
        }
    }
}

impl From<ExecuteError> for Outcome {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Validation(message) => Outcome::InvalidRequest { message },
            ExecuteError::UnsupportedLanguage(language) => Outcome::UnsupportedLanguage { language },
            ExecuteError::ToolchainUnavailable { language, program } => {
                Outcome::ToolchainUnavailable { language, program }
            }
            ExecuteError::Overloaded(_) => Outcome::Overloaded,
            ExecuteError::Cancelled => Outcome::Cancelled,
            err @ (ExecuteError::Compile(_)
            | ExecuteError::Sandbox(_)
            | ExecuteError::SpawnFailed(_)) => Outcome::InternalError {
                message: err.to_string(),
            },
        }
    }
}

/// Everything a compile or run step needs to build its command
#[derive(Debug)]
pub(crate) struct Step<'a> {
    adapter: &'a Adapter,
    workspace: &'a Workspace,
    stem: String,
    source_name: String,
    output_name: Option<String>,
    confinement: &'a dyn Confinement,
    cancel: &'a CancellationToken,
}

impl Step<'_> {
    /// Expand a command template into a confined process in the workspace
    ///
    /// The child sees only `PATH`, `HOME`, `TMPDIR`, `LANG`, and the
    /// adapter's own variables.
    fn command(
        &self,
        template: &[String],
        env: &HashMap<String, String>,
        limits: ResourceLimits,
    ) -> Result<ProcessCommand, SandboxError> {
        let workdir = self.workspace.path().to_string_lossy().into_owned();
        let values = Placeholders {
            source: &self.source_name,
            binary: self.output_name.as_deref().unwrap_or(&self.source_name),
            name: &self.stem,
            workdir: &workdir,
        };
        let argv = Language::expand_command(template, &values);

        let command = ProcessCommand::from_argv(&argv)
            .ok_or(SandboxError::EmptyCommand)?
            .env("PATH", &self.adapter.language().run.path)
            .env("HOME", &workdir)
            .env("TMPDIR", &workdir)
            .env("LANG", "C.UTF-8")
            .envs(env)
            .working_dir(self.workspace.path())
            .limits(limits);

        self.confinement.wrap(command, self.workspace.path())
    }
}

/// Code execution engine
///
/// Cheap to clone; clones share the registry, the admission slots, and the
/// confinement backend.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    registry: Arc<Registry>,
    slots: Arc<SlotPool>,
    confinement: Arc<dyn Confinement>,
    observer: Option<Arc<dyn StateObserver>>,
}

impl Runner {
    /// Create a new runner, resolving every adapter's toolchain
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let confinement = build_confinement(&config)?;
        let registry = Registry::from_config(&config);
        let slots = SlotPool::new(config.max_concurrent, config.admission_wait());
        debug!(
            languages = registry.len(),
            confinement = confinement.name(),
            max_concurrent = config.max_concurrent,
            "runner ready"
        );
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            slots: Arc::new(slots),
            confinement,
            observer: None,
        })
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(Config::default())
    }

    /// Report every state transition to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn confinement(&self) -> &dyn Confinement {
        self.confinement.as_ref()
    }

    /// Number of executions that could be admitted right now
    pub fn available_slots(&self) -> usize {
        self.slots.available()
    }

    /// Run one request to completion
    ///
    /// Dropping the returned future kills any running process and removes
    /// the workspace.
    pub async fn execute(&self, request: ExecutionRequest) -> Outcome {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run one request, stopping early once `cancel` fires
    #[instrument(skip_all, fields(request = %request.id(), language = %request.language))]
    pub async fn execute_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Outcome {
        let mut tracker = StateTracker::new(request.id(), self.observer.clone());
        let outcome = match self.drive(&request, &cancel, &mut tracker).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    ExecuteError::Compile(_)
                    | ExecuteError::Sandbox(_)
                    | ExecuteError::SpawnFailed(_) => {
                        warn!(error = %err, "execution failed");
                    }
                    _ => debug!(error = %err, "request rejected"),
                }
                Outcome::from(err)
            }
        };
        let last = tracker.current();
        tracker.advance(ExecutionState::Terminal);
        debug!(status = outcome.status(), from = %last, "execution finished");
        outcome
    }

    async fn drive(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<Outcome, ExecuteError> {
        let adapter = self.validate(request)?;
        tracker.advance(ExecutionState::Validated);

        let _slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracker.advance(ExecutionState::Cancelled);
                return Err(ExecuteError::Cancelled);
            }
            slot = self.slots.acquire() => {
                slot.ok_or(ExecuteError::Overloaded(self.slots.capacity()))?
            }
        };

        let workspace = Workspace::provision(&self.config.workspace_root(), request.id()).await?;
        let result = self
            .run_in_workspace(adapter, request, &workspace, cancel, tracker)
            .await;

        if let Err(err) = workspace.release().await {
            warn!(error = %err, "workspace release failed");
        }
        tracker.advance(ExecutionState::WorkspaceReleased);
        result
    }

    /// Reject malformed requests before anything touches the filesystem
    fn validate(&self, request: &ExecutionRequest) -> Result<&Adapter, ExecuteError> {
        if request.language.trim().is_empty() {
            return Err(ExecuteError::Validation("language must not be empty".to_owned()));
        }
        if request.source.trim().is_empty() {
            return Err(ExecuteError::Validation("source must not be empty".to_owned()));
        }
        if request.source.len() > self.config.max_source_size {
            return Err(ExecuteError::Validation(format!(
                "source is {} bytes, the limit is {}",
                request.source.len(),
                self.config.max_source_size
            )));
        }
        if let Some(ref stdin) = request.stdin
            && stdin.len() > self.config.max_stdin_size
        {
            return Err(ExecuteError::Validation(format!(
                "stdin is {} bytes, the limit is {}",
                stdin.len(),
                self.config.max_stdin_size
            )));
        }
        if let Some(ref limits) = request.limits
            && limits.wall_time_limit.is_some()
            && limits.wall_time().is_none()
        {
            return Err(ExecuteError::Validation(
                "wall_time_limit must be a positive number of seconds".to_owned(),
            ));
        }

        Ok(self.registry.lookup(&request.language)?)
    }

    async fn run_in_workspace(
        &self,
        adapter: &Adapter,
        request: &ExecutionRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<Outcome, ExecuteError> {
        let language = adapter.language();
        let stem = language.naming.derive(&request.source);
        let source_name = language.source_name(&stem);
        let output_name = language.output_name(&stem);
        workspace
            .write_file(&source_name, request.source.as_bytes())
            .await?;
        debug!(source_name, ?output_name, "wrote source file");

        let step = Step {
            adapter,
            workspace,
            stem,
            source_name,
            output_name,
            confinement: self.confinement.as_ref(),
            cancel,
        };

        if adapter.is_compiled() {
            tracker.advance(ExecutionState::Compiling);
        }
        let compiled = match compile::compile(&step, &self.config).await {
            Ok(compiled) => compiled,
            Err(CompileError::SpawnFailed { program, message }) => {
                debug!(program, message, "compiler could not be started");
                return Err(ExecuteError::ToolchainUnavailable {
                    language: adapter.id().to_owned(),
                    program,
                });
            }
            Err(err) => return Err(err.into()),
        };
        match compiled {
            CompileOutcome::Skipped => tracker.advance(ExecutionState::CompileSkipped),
            CompileOutcome::Succeeded { .. } => tracker.advance(ExecutionState::Compiled),
            CompileOutcome::Failed { diagnostics, .. } => {
                tracker.advance(ExecutionState::CompileFailed);
                return Ok(Outcome::CompileError {
                    output: diagnostics,
                });
            }
            CompileOutcome::TimedOut {
                diagnostics,
                elapsed,
            } => {
                tracker.advance(ExecutionState::CompileFailed);
                return Ok(Outcome::Timeout {
                    phase: Phase::Compile,
                    output: diagnostics,
                    elapsed_ms: elapsed_ms(elapsed),
                });
            }
            CompileOutcome::Cancelled => {
                tracker.advance(ExecutionState::Cancelled);
                return Err(ExecuteError::Cancelled);
            }
        }

        tracker.advance(ExecutionState::Executing);
        let stdin = request.stdin.as_deref().map(normalize_stdin);
        let run = execute::execute(
            &step,
            &self.config,
            stdin.as_deref(),
            request.limits.as_ref(),
        )
        .await?;

        match judge(run) {
            RunVerdict::Finished { state, outcome } => {
                tracker.advance(state);
                Ok(outcome)
            }
            RunVerdict::Cancelled => {
                tracker.advance(ExecutionState::Cancelled);
                Err(ExecuteError::Cancelled)
            }
            RunVerdict::SpawnFailed(message) if adapter.runs_host_program() => {
                debug!(message, "interpreter could not be started");
                Err(ExecuteError::ToolchainUnavailable {
                    language: adapter.id().to_owned(),
                    program: adapter.run_program().to_owned(),
                })
            }
            RunVerdict::SpawnFailed(message) => Err(ExecuteError::SpawnFailed(message)),
        }
    }
}
