//! End-to-end tests for the coderun engine
//!
//! These tests only need a POSIX shell and coreutils. Languages are declared
//! in a test config: `sh` interprets the source directly, and `shc` fakes a
//! compiled language whose "compiler" copies the source to an artifact and
//! rejects any source containing `SYNTAX_ERROR`.

use std::path::Path;
use std::time::Duration;

use coderun::{Config, Runner};
use tempfile::TempDir;

mod cancellation;
mod concurrency;
mod interpreted;
mod rejection;

const ENGINE_CONFIG: &str = r#"
workspace_root = "@ROOT@"
max_concurrent = 8
admission_wait = 0.0
max_source_size = 4096
max_stdin_size = 4096

[default_limits]
time_limit = 5.0
wall_time_limit = 10.0
max_output = 1024

[compile_limits]
time_limit = 10.0
wall_time_limit = 10.0
max_output = 64

[languages.sh]
name = "POSIX shell"
extension = "sh"
aliases = ["shell"]

[languages.sh.run]
command = ["sh", "{source}"]

[languages.shc]
name = "Compiled shell"
extension = "sh"

[languages.shc.compile]
command = ["sh", "-c", 'if grep -q SYNTAX_ERROR {source}; then echo "{source}:1: error: syntax error" >&2; exit 1; fi; cp {source} {output}']
source_name = "{name}.sh"
output_name = "{name}.bin"

[languages.shc.run]
command = ["sh", "{binary}"]

[languages.ghost]
name = "Ghost"
extension = "gh"

[languages.ghost.run]
command = ["coderun-no-such-interpreter", "{source}"]
"#;

/// Scratch root that every workspace of one test lives under
pub(crate) struct Harness {
    pub root: TempDir,
    pub runner: Runner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Build a harness after adjusting the engine config
    pub fn with(adjust: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().expect("failed to create workspace root");
        let mut config = engine_config(root.path());
        adjust(&mut config);
        let runner = Runner::new(config).expect("failed to create runner");
        Self { root, runner }
    }

    /// Entries left under the workspace root
    pub fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.root.path())
            .expect("workspace root should exist")
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    pub fn assert_clean(&self) {
        let leftovers = self.leftovers();
        assert!(leftovers.is_empty(), "workspaces left behind: {leftovers:?}");
    }
}

pub(crate) fn engine_config(root: &Path) -> Config {
    let toml = ENGINE_CONFIG.replace("@ROOT@", &root.to_string_lossy());
    Config::parse_toml(&toml).expect("engine test config should be valid")
}

/// Whether `pid` is gone or only a zombie waiting to be reaped
pub(crate) fn process_is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
        Err(_) => true,
    }
}

/// Poll until `pid` has died, up to `limit`
pub(crate) async fn wait_for_death(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if process_is_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    process_is_dead(pid)
}
