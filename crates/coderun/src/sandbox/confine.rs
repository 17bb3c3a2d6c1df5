//! Confinement backends
//!
//! Resource limits are applied to every child between fork and exec. A
//! [`Confinement`] backend may additionally rewrite the invocation, e.g. to
//! run it inside a bubblewrap jail.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::{Config, ConfigError, ConfinementKind};
use crate::sandbox::{ProcessCommand, SandboxError};
use crate::types::{MountConfig, ResourceLimits};

/// Host directories exposed read-only inside the bubblewrap jail
const SYSTEM_DIRS: [&str; 5] = ["/usr", "/bin", "/lib", "/lib64", "/etc"];

/// A mechanism that confines a child process to its workspace
pub trait Confinement: Send + Sync + Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Rewrite `command` so that it runs confined to `workspace`
    fn wrap(&self, command: ProcessCommand, workspace: &Path)
    -> Result<ProcessCommand, SandboxError>;
}

/// Build the backend selected by the configuration
pub fn build_confinement(config: &Config) -> Result<Arc<dyn Confinement>, ConfigError> {
    match config.confinement {
        ConfinementKind::Rlimit => Ok(Arc::new(RlimitConfinement)),
        ConfinementKind::Bubblewrap => {
            let backend =
                BubblewrapConfinement::new(config.bubblewrap_binary(), &config.sandbox_mounts)?;
            Ok(Arc::new(backend))
        }
    }
}

/// Resource limits, a cleared environment, and the workspace as cwd
///
/// The command is left untouched; the limits themselves are installed by
/// the spawn path for every backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitConfinement;

impl Confinement for RlimitConfinement {
    fn name(&self) -> &'static str {
        "rlimit"
    }

    fn wrap(
        &self,
        command: ProcessCommand,
        _workspace: &Path,
    ) -> Result<ProcessCommand, SandboxError> {
        Ok(command)
    }
}

/// Jail each child with bubblewrap: fresh namespaces, a read-only view of
/// the system directories, and the workspace as the only writable mount
#[derive(Debug, Clone)]
pub struct BubblewrapConfinement {
    binary: PathBuf,
    mounts: Vec<MountConfig>,
}

impl BubblewrapConfinement {
    /// Locate the bubblewrap binary and check the extra mounts
    pub fn new(binary: impl AsRef<Path>, mounts: &[MountConfig]) -> Result<Self, ConfigError> {
        let binary = which::which(binary.as_ref()).map_err(|e| {
            ConfigError::ConfinementUnavailable {
                backend: "bubblewrap".to_owned(),
                message: format!("{}: {e}", binary.as_ref().display()),
            }
        })?;
        validate_mounts(mounts)?;
        debug!(binary = %binary.display(), "bubblewrap confinement ready");
        Ok(Self {
            binary,
            mounts: mounts.to_vec(),
        })
    }

    fn arguments(&self, workspace: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["--unshare-all", "--die-with-parent"]
            .into_iter()
            .map(str::to_owned)
            .collect();

        for dir in SYSTEM_DIRS {
            args.extend(["--ro-bind-try".to_owned(), dir.to_owned(), dir.to_owned()]);
        }
        args.extend(
            ["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]
                .into_iter()
                .map(str::to_owned),
        );

        for mount in &self.mounts {
            let flag = match (mount.writable, mount.optional) {
                (true, true) => "--bind-try",
                (true, false) => "--bind",
                (false, true) => "--ro-bind-try",
                (false, false) => "--ro-bind",
            };
            args.extend([flag.to_owned(), mount.source.clone(), mount.target.clone()]);
        }

        let workspace = workspace.to_string_lossy().into_owned();
        args.extend([
            "--bind".to_owned(),
            workspace.clone(),
            workspace.clone(),
            "--chdir".to_owned(),
            workspace,
            "--".to_owned(),
        ]);
        args
    }
}

impl Confinement for BubblewrapConfinement {
    fn name(&self) -> &'static str {
        "bubblewrap"
    }

    fn wrap(
        &self,
        command: ProcessCommand,
        workspace: &Path,
    ) -> Result<ProcessCommand, SandboxError> {
        if !workspace.is_absolute() {
            return Err(SandboxError::Confinement(format!(
                "workspace path must be absolute: {}",
                workspace.display()
            )));
        }
        let args = self.arguments(workspace);
        Ok(command.wrap_with(self.binary.clone(), args))
    }
}

/// Validate that all mount source paths exist
///
/// Optional mounts are skipped when their source is missing.
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), ConfigError> {
    for mount in mounts {
        if mount.optional {
            continue;
        }
        if !Path::new(&mount.source).exists() {
            return Err(ConfigError::ConfinementUnavailable {
                backend: "bubblewrap".to_owned(),
                message: format!("mount source path does not exist: {}", mount.source),
            });
        }
    }
    Ok(())
}

/// Limits in the units `setrlimit` expects, computed before fork so the
/// child does no allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RlimitPlan {
    cpu_seconds: Option<libc::rlim_t>,
    address_space: Option<libc::rlim_t>,
    stack: Option<libc::rlim_t>,
    processes: Option<libc::rlim_t>,
    file_size: Option<libc::rlim_t>,
    open_files: Option<libc::rlim_t>,
}

impl RlimitPlan {
    pub(crate) fn from_limits(limits: &ResourceLimits) -> Self {
        let bytes = |kb: u64| kb.saturating_mul(1024) as libc::rlim_t;
        Self {
            cpu_seconds: limits
                .time_limit
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| secs.ceil().max(1.0) as libc::rlim_t),
            address_space: limits.memory_limit.map(bytes),
            stack: limits.stack_limit.map(bytes),
            processes: limits.max_processes.map(libc::rlim_t::from),
            file_size: limits.max_file_size.map(bytes),
            open_files: limits.max_open_files.map(libc::rlim_t::from),
        }
    }

    /// CPU time after which the kernel sends SIGXCPU
    pub(crate) fn cpu_limit(&self) -> Option<Duration> {
        self.cpu_seconds.map(|secs| Duration::from_secs(u64::from(secs)))
    }
}

macro_rules! set_limit {
    ($resource:expr, $soft:expr, $hard:expr) => {{
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // An unprivileged child cannot raise its hard limit, so clamp to it.
        let mut hard: libc::rlim_t = $hard;
        if libc::getrlimit($resource, &mut current) == 0 && current.rlim_max < hard {
            hard = current.rlim_max;
        }
        let soft: libc::rlim_t = if $soft < hard { $soft } else { hard };
        let lim = libc::rlimit {
            rlim_cur: soft,
            rlim_max: hard,
        };
        if libc::setrlimit($resource, &lim) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }};
}

/// Install resource limits on the child between fork and exec
pub(crate) fn apply_rlimits(command: &mut Command, limits: &ResourceLimits) {
    let plan = RlimitPlan::from_limits(limits);
    // SAFETY: the closure only calls async-signal-safe libc functions on
    // values copied in before fork.
    unsafe {
        command.pre_exec(move || {
            // SIGXCPU at the soft limit, SIGKILL one second later
            if let Some(secs) = plan.cpu_seconds {
                set_limit!(libc::RLIMIT_CPU, secs, secs.saturating_add(1));
            }
            if let Some(bytes) = plan.address_space {
                set_limit!(libc::RLIMIT_AS, bytes, bytes);
            }
            if let Some(bytes) = plan.stack {
                set_limit!(libc::RLIMIT_STACK, bytes, bytes);
            }
            if let Some(count) = plan.processes {
                set_limit!(libc::RLIMIT_NPROC, count, count);
            }
            if let Some(bytes) = plan.file_size {
                set_limit!(libc::RLIMIT_FSIZE, bytes, bytes);
            }
            if let Some(count) = plan.open_files {
                set_limit!(libc::RLIMIT_NOFILE, count, count);
            }
            set_limit!(libc::RLIMIT_CORE, 0, 0);
            Ok(())
        });
    }
}
