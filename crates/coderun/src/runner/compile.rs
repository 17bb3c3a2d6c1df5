//! Compilation step
//!
//! Runs the adapter's compiler inside the workspace and decides whether the
//! source was accepted.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::Config;
use crate::runner::{CompileError, Step};
use crate::sandbox::{CompletionReason, KillReason, elapsed_ms, supervise};

/// Result of the compile step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The language is interpreted
    Skipped,

    /// The compiler exited cleanly
    Succeeded { artifact: String, elapsed: Duration },

    /// The compiler rejected the source; diagnostics are its merged output
    Failed {
        diagnostics: String,
        exit_code: Option<i32>,
    },

    /// The compiler exceeded its wall clock or CPU time ceiling
    TimedOut {
        diagnostics: String,
        elapsed: Duration,
    },

    Cancelled,
}

impl CompileOutcome {
    /// Check if the run step may proceed
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CompileOutcome::Skipped | CompileOutcome::Succeeded { .. }
        )
    }
}

/// Compile the workspace source, if the adapter has a compile step
///
/// A compile fails when the compiler exits nonzero or is killed. A clean
/// exit is a success even with warnings, and even when the artifact is not
/// where the naming rule expected it.
#[instrument(skip_all, fields(language = step.adapter.id()))]
pub(crate) async fn compile(step: &Step<'_>, config: &Config) -> Result<CompileOutcome, CompileError> {
    let (Some(template), Some(compile), Some(artifact)) = (
        step.adapter.compile_command(),
        step.adapter.language().compile.as_ref(),
        step.output_name.as_deref(),
    ) else {
        return Ok(CompileOutcome::Skipped);
    };

    let limits = config.compile_limits_for(compile.limits.as_ref());
    let command = step.command(template, &compile.env, limits)?;
    let outcome = supervise(command, None, step.cancel).await?;
    let mut diagnostics = outcome.output_lossy();

    let result = match outcome.reason {
        CompletionReason::Exited { code: Some(0), .. } => {
            // The derived artifact name is a guess; the run step reports
            // whatever the toolchain makes of a missing file.
            if !step.workspace.file_exists(artifact).await? {
                debug!(artifact, "compiler succeeded without the expected artifact");
            }
            CompileOutcome::Succeeded {
                artifact: artifact.to_owned(),
                elapsed: outcome.elapsed,
            }
        }
        CompletionReason::Exited { code, signal } => {
            if diagnostics.is_empty()
                && let Some(signal) = signal
            {
                diagnostics = format!("compiler terminated by signal {signal}");
            }
            CompileOutcome::Failed {
                diagnostics,
                exit_code: code,
            }
        }
        CompletionReason::Killed(KillReason::OutputLimit) => CompileOutcome::Failed {
            diagnostics,
            exit_code: None,
        },
        CompletionReason::TimedOut => CompileOutcome::TimedOut {
            diagnostics,
            elapsed: outcome.elapsed,
        },
        CompletionReason::Killed(KillReason::Cancelled) => CompileOutcome::Cancelled,
        CompletionReason::SpawnFailed(message) => {
            return Err(CompileError::SpawnFailed {
                program: template.first().cloned().unwrap_or_default(),
                message,
            });
        }
    };

    debug!(
        success = result.is_success(),
        elapsed_ms = elapsed_ms(outcome.elapsed),
        "compilation complete"
    );
    Ok(result)
}
