use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource ceilings for one compile or run step.
///
/// Every field is optional so that a partial table (a language step, a
/// request override) only replaces the values it actually names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Address space limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads for the sandbox user
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured output in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum size of any file the program writes, in kilobytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,
}

impl ResourceLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Create new resource limits with the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, the identity for [`with_overrides`](Self::with_overrides)
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_file_size: None,
            max_open_files: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Set the maximum written file size in kilobytes
    pub fn with_max_file_size(mut self, kb: u64) -> Self {
        self.max_file_size = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Wall clock ceiling as a duration, if one is set and positive
    pub fn wall_time(&self) -> Option<Duration> {
        self.wall_time_limit
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Output ceiling in bytes
    pub fn output_ceiling(&self) -> Option<usize> {
        self.max_output
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(5.0),
            wall_time_limit: Some(10.0),
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: Some(1024),         // 1 MB
            max_file_size: Some(16 * 1024), // 16 MB
            max_open_files: Some(256),
        }
    }
}

/// Configuration for an extra directory mount under the bubblewrap backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    #[serde(default)]
    pub optional: bool,
}

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identifier of one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to run one program
///
/// Immutable once built; the id is assigned at construction.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    id: RequestId,

    /// Language identifier or alias (e.g., "python", "cpp")
    pub language: String,

    /// Program source text
    pub source: String,

    /// Text delivered on the program's standard input
    pub stdin: Option<String>,

    /// Per-request limit overrides, applied last
    pub limits: Option<ResourceLimits>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            language: language.into(),
            source: source.into(),
            stdin: None,
            limits: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

/// Step of the pipeline an outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Compile,
    Run,
}

/// Terminal result handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// The program ran to completion, possibly with a nonzero exit or a crash
    Ok {
        output: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        truncated: bool,
        elapsed_ms: u64,
    },

    /// The compiler rejected the source; `output` holds its diagnostics
    CompileError { output: String },

    /// A step exceeded its wall clock ceiling
    Timeout {
        phase: Phase,
        output: String,
        elapsed_ms: u64,
    },

    UnsupportedLanguage { language: String },

    ToolchainUnavailable { language: String, program: String },

    /// Every execution slot is busy; retry later
    Overloaded,

    InvalidRequest { message: String },

    Cancelled,

    InternalError { message: String },
}

impl Outcome {
    /// Wire name of the status
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Ok { .. } => "ok",
            Outcome::CompileError { .. } => "compileError",
            Outcome::Timeout { .. } => "timeout",
            Outcome::UnsupportedLanguage { .. } => "unsupportedLanguage",
            Outcome::ToolchainUnavailable { .. } => "toolchainUnavailable",
            Outcome::Overloaded => "overloaded",
            Outcome::InvalidRequest { .. } => "invalidRequest",
            Outcome::Cancelled => "cancelled",
            Outcome::InternalError { .. } => "internalError",
        }
    }

    /// Captured program or compiler output, if the outcome carries any
    pub fn output(&self) -> Option<&str> {
        match self {
            Outcome::Ok { output, .. }
            | Outcome::CompileError { output }
            | Outcome::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    /// Whether the failure is infrastructural rather than the program's own doing
    #[must_use]
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self,
            Outcome::ToolchainUnavailable { .. }
                | Outcome::Overloaded
                | Outcome::InternalError { .. }
        )
    }
}
