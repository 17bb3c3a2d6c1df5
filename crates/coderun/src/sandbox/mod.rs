//! Process sandbox
//!
//! Scratch workspaces, confined child processes, and the supervisor that
//! feeds, watches, and terminates them.
//!
//! Children are always spawned as process-group leaders so that a timeout,
//! an output overflow, or a cancellation can take down every descendant with
//! a single signal.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::sandbox::command::ProcessCommand;
pub use crate::sandbox::confine::{
    BubblewrapConfinement, Confinement, RlimitConfinement, build_confinement, validate_mounts,
};
pub use crate::sandbox::process::{
    CompletionReason, ExecutionOutcome, KillReason, ProcessGroupGuard, supervise,
};
pub use crate::sandbox::workspace::Workspace;
pub(crate) use crate::sandbox::process::elapsed_ms;

mod command;
mod confine;
mod process;
mod workspace;

/// Errors that occur during sandbox operations
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create workspace at {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to release workspace at {path}: {source}")]
    WorkspaceRelease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("command has no program")]
    EmptyCommand,

    #[error("confinement failed: {0}")]
    Confinement(String),

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
