//! Process supervision
//!
//! Spawns one child, feeds its stdin, collects its merged stdout and stderr
//! up to a ceiling, and ends its whole process group on timeout, overflow,
//! or cancellation.

use std::os::unix::process::ExitStatusExt;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::sandbox::confine::RlimitPlan;
use crate::sandbox::{ProcessCommand, SandboxError};

/// Wall clock ceiling used when the limits do not name one
pub const FALLBACK_WALL_TIME: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 8 * 1024;

/// How long to keep collecting output after the process group is gone
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Why the supervisor killed the process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// Captured output reached the ceiling
    OutputLimit,
    /// The caller cancelled the execution
    Cancelled,
}

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    /// The process exited on its own, with a code or by a signal
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// The wall clock ceiling elapsed, or the kernel ended the process for
    /// using up its CPU time
    TimedOut,

    /// The supervisor ended the process group
    Killed(KillReason),

    /// The program could not be started at all
    SpawnFailed(String),
}

/// Everything observed about one supervised process
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub reason: CompletionReason,

    /// Interleaved stdout and stderr, at most the output ceiling
    pub output: Vec<u8>,

    /// Whether output beyond the ceiling was discarded
    pub truncated: bool,

    pub elapsed: Duration,

    /// Pid of the group leader, if it was spawned
    pub pid: Option<u32>,
}

impl ExecutionOutcome {
    fn spawn_failed(message: String, elapsed: Duration) -> Self {
        Self {
            reason: CompletionReason::SpawnFailed(message),
            output: Vec::new(),
            truncated: false,
            elapsed,
            pid: None,
        }
    }

    /// Whether the process exited with code zero
    pub fn success(&self) -> bool {
        matches!(
            self.reason,
            CompletionReason::Exited {
                code: Some(0),
                ..
            }
        )
    }

    /// Output decoded as UTF-8, with invalid sequences replaced
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Kills a process group when dropped
///
/// The group is signalled at most once so that a recycled pgid is never hit.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    pgid: libc::pid_t,
    armed: bool,
}

impl ProcessGroupGuard {
    /// Guard the group led by `pid`
    pub fn new(pid: u32) -> Option<Self> {
        let pgid = libc::pid_t::try_from(pid).ok().filter(|pgid| *pgid > 0)?;
        Some(Self { pgid, armed: true })
    }

    pub fn pgid(&self) -> libc::pid_t {
        self.pgid
    }

    /// Send SIGKILL to every member of the group
    pub fn kill(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        // SAFETY: plain syscall; a negative pid addresses the whole group.
        let rc = unsafe { libc::kill(-self.pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pgid = self.pgid, error = %err, "failed to kill process group");
            }
        } else {
            trace!(pgid = self.pgid, "process group killed");
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Captured output with a byte ceiling
#[derive(Debug, Default)]
struct OutputBuffer {
    data: Vec<u8>,
    ceiling: Option<usize>,
    truncated: bool,
}

impl OutputBuffer {
    fn new(ceiling: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            ceiling,
            truncated: false,
        }
    }

    /// Append a chunk; returns true once the ceiling has been exceeded
    fn push(&mut self, chunk: &[u8]) -> bool {
        let Some(ceiling) = self.ceiling else {
            self.data.extend_from_slice(chunk);
            return false;
        };
        let room = ceiling.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.data.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return true;
        }
        self.data.extend_from_slice(chunk);
        false
    }
}

fn spawn_reader<R>(mut pipe: R, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    trace!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

enum Stop {
    Exited(std::process::ExitStatus),
    Timeout,
    Kill(KillReason),
}

/// Run `command` to completion under supervision
///
/// `stdin` is written in full and the pipe closed; with `None` the child sees
/// end of input immediately. The process group is killed when the wall
/// clock ceiling of the command's limits elapses, when the output ceiling is
/// exceeded, or when `cancel` fires. Once the leader is gone any remaining
/// descendants are killed as well.
///
/// A program that cannot be started is reported as
/// [`CompletionReason::SpawnFailed`], not as an error.
#[instrument(skip_all, fields(program = %command.program().display()))]
pub async fn supervise(
    command: ProcessCommand,
    stdin: Option<&[u8]>,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, SandboxError> {
    let wall = command
        .get_limits()
        .wall_time()
        .unwrap_or(FALLBACK_WALL_TIME);
    let ceiling = command.get_limits().output_ceiling();
    let cpu_limit = RlimitPlan::from_limits(command.get_limits()).cpu_limit();
    debug!(argv = ?command.argv(), ?wall, ?ceiling, "spawning process");

    let started = Instant::now();
    let mut child = match command.into_command().spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "spawn failed");
            return Ok(ExecutionOutcome::spawn_failed(e.to_string(), started.elapsed()));
        }
    };
    let pid = child.id();
    let mut group = pid.and_then(ProcessGroupGuard::new);

    let stdin_pipe = child.stdin.take();
    let stdin_data = stdin.map(<[u8]>::to_vec);
    let stdin_task = tokio::spawn(async move {
        if let (Some(mut pipe), Some(data)) = (stdin_pipe, stdin_data) {
            // The program may exit without reading; a broken pipe is fine.
            if let Err(e) = pipe.write_all(&data).await {
                trace!(error = %e, "stdin write stopped");
            }
            let _ = pipe.shutdown().await;
        }
    });

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, tx.clone()));
    }
    drop(tx);

    let mut buffer = OutputBuffer::new(ceiling);
    let mut channel_open = true;
    let deadline = tokio::time::sleep(wall);
    tokio::pin!(deadline);

    let stop = loop {
        tokio::select! {
            chunk = rx.recv(), if channel_open => match chunk {
                Some(chunk) => {
                    if buffer.push(&chunk) {
                        break Stop::Kill(KillReason::OutputLimit);
                    }
                }
                None => channel_open = false,
            },
            status = child.wait() => {
                break Stop::Exited(status.map_err(SandboxError::Wait)?);
            }
            () = &mut deadline => break Stop::Timeout,
            () = cancel.cancelled() => break Stop::Kill(KillReason::Cancelled),
        }
    };
    let elapsed = started.elapsed();

    // Descendants die with the leader, whatever ended it.
    if let Some(ref mut group) = group {
        group.kill();
    }
    if !matches!(stop, Stop::Exited(_))
        && let Err(e) = child.kill().await
    {
        debug!(error = %e, "reaping killed child failed");
    }

    if !buffer.truncated {
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(chunk) = rx.recv().await {
                if buffer.push(&chunk) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("output still open after the process group was killed");
        }
    }
    drop(rx);
    for reader in readers {
        reader.abort();
    }
    stdin_task.abort();

    let reason = match stop {
        Stop::Exited(status) if hit_cpu_limit(status.signal(), cpu_limit, elapsed) => {
            debug!(signal = status.signal(), "CPU time limit reached");
            CompletionReason::TimedOut
        }
        Stop::Exited(status) => CompletionReason::Exited {
            code: status.code(),
            signal: status.signal(),
        },
        Stop::Timeout => CompletionReason::TimedOut,
        Stop::Kill(kill) => CompletionReason::Killed(kill),
    };
    debug!(
        ?reason,
        elapsed_ms = elapsed_ms(elapsed),
        output_len = buffer.data.len(),
        truncated = buffer.truncated,
        "process finished"
    );

    Ok(ExecutionOutcome {
        reason,
        output: buffer.data,
        truncated: buffer.truncated,
        elapsed,
        pid,
    })
}

/// Whether an exit by `signal` was the kernel enforcing `RLIMIT_CPU`
///
/// The soft limit delivers SIGXCPU. A program that ignores it is killed at
/// the hard limit one second later, which only shows as a SIGKILL after at
/// least the soft limit of wall time.
fn hit_cpu_limit(signal: Option<i32>, cpu_limit: Option<Duration>, elapsed: Duration) -> bool {
    match (signal, cpu_limit) {
        (Some(libc::SIGXCPU), _) => true,
        (Some(libc::SIGKILL), Some(limit)) => elapsed >= limit,
        _ => false,
    }
}

/// Milliseconds in `elapsed`, saturating
pub(crate) fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
