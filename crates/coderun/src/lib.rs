//! A library for running untrusted programs.
//!
//! Coderun takes a language identifier, program text, and optional input,
//! runs the program in a private scratch directory under resource limits, and
//! reports a structured outcome.
//!
//! # Features
//!
//! - **Multi-language**: interpreted and compiled languages described entirely in TOML.
//! - **Workspaces**: a fresh directory per execution, always removed afterwards.
//! - **Supervision**: wall clock and output ceilings enforced on the whole process group.
//! - **Admission control**: a bounded number of executions in flight, the rest rejected.
//! - **Confinement**: `setrlimit` ceilings for every child, optionally a bubblewrap jail.
//!
//! ```rust,ignore
//! let runner = Runner::new(Config::load(None)?)?;
//! let outcome = runner
//!     .execute(ExecutionRequest::new("python", "print(input())").with_stdin("hi"))
//!     .await;
//! assert_eq!(outcome.output(), Some("hi\n"));
//! ```

pub use config::{Config, ConfigError, ConfinementKind, EXAMPLE_CONFIG, Language, NamingRule};
pub use registry::{Adapter, LookupError, ProgramStatus, Registry};
pub use runner::{
    CancellationToken, CompileError, CompileOutcome, ExecuteError, ExecutionState, Runner, Slot,
    SlotPool, StateObserver,
};
pub use sandbox::{
    CompletionReason, Confinement, ExecutionOutcome, KillReason, ProcessCommand, SandboxError,
    Workspace, supervise,
};
pub use types::{ExecutionRequest, MountConfig, Outcome, Phase, RequestId, ResourceLimits};

pub mod config;
pub mod registry;
pub mod runner;
pub mod sandbox;
pub mod types;
