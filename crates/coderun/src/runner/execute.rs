//! Execution step
//!
//! Runs the interpreter or the compiled artifact with the request's input
//! and maps what the supervisor observed onto an outcome.

use tracing::instrument;

use crate::config::Config;
use crate::runner::{ExecutionState, Step};
use crate::sandbox::{
    CompletionReason, ExecutionOutcome, KillReason, SandboxError, elapsed_ms, supervise,
};
use crate::types::{Outcome, Phase, ResourceLimits};

/// Run the program in its workspace
///
/// Limits merge in order: engine defaults, the language's run limits, then
/// the request's overrides.
#[instrument(skip_all, fields(language = step.adapter.id()))]
pub(crate) async fn execute(
    step: &Step<'_>,
    config: &Config,
    stdin: Option<&[u8]>,
    overrides: Option<&ResourceLimits>,
) -> Result<ExecutionOutcome, SandboxError> {
    let run = &step.adapter.language().run;
    let limits = config.run_limits(run.limits.as_ref(), overrides);

    let command = step.command(step.adapter.run_command(), &run.env, limits)?;
    supervise(command, stdin, step.cancel).await
}

/// Input as delivered to the program: a non-empty text always ends with a
/// newline, so line-reading programs see the last line.
pub(crate) fn normalize_stdin(input: &str) -> Vec<u8> {
    let mut bytes = input.as_bytes().to_vec();
    if !bytes.is_empty() && !input.ends_with('\n') {
        bytes.push(b'\n');
    }
    bytes
}

/// How a finished run step concludes the request
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunVerdict {
    /// The run ended on its own terms
    Finished {
        state: ExecutionState,
        outcome: Outcome,
    },

    Cancelled,

    /// The program could not be started
    SpawnFailed(String),
}

/// Map a supervised run onto the coordinator's states and outcomes
///
/// Exits with any code are `Completed`; termination by a signal or by the
/// output ceiling is `Crashed`. Both report the output.
pub(crate) fn judge(run: ExecutionOutcome) -> RunVerdict {
    let elapsed_ms = elapsed_ms(run.elapsed);
    let output = String::from_utf8_lossy(&run.output).into_owned();

    match run.reason {
        CompletionReason::Exited { code, signal } => RunVerdict::Finished {
            state: if signal.is_some() {
                ExecutionState::Crashed
            } else {
                ExecutionState::Completed
            },
            outcome: Outcome::Ok {
                output,
                exit_code: code,
                signal,
                truncated: run.truncated,
                elapsed_ms,
            },
        },
        CompletionReason::Killed(KillReason::OutputLimit) => RunVerdict::Finished {
            state: ExecutionState::Crashed,
            outcome: Outcome::Ok {
                output,
                exit_code: None,
                signal: Some(libc::SIGKILL),
                truncated: true,
                elapsed_ms,
            },
        },
        CompletionReason::TimedOut => RunVerdict::Finished {
            state: ExecutionState::TimedOut,
            outcome: Outcome::Timeout {
                phase: Phase::Run,
                output,
                elapsed_ms,
            },
        },
        CompletionReason::Killed(KillReason::Cancelled) => RunVerdict::Cancelled,
        CompletionReason::SpawnFailed(message) => RunVerdict::SpawnFailed(message),
    }
}
