use std::path::Path;
use std::time::{Duration, Instant};

use coderun::{ExecutionRequest, Outcome, Phase, ResourceLimits};

use super::{Harness, wait_for_death};

#[tokio::test]
async fn test_hello_world() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "echo 'Hello, World!'"))
        .await;

    match outcome {
        Outcome::Ok {
            output,
            exit_code,
            signal,
            truncated,
            ..
        } => {
            assert_eq!(output, "Hello, World!\n");
            assert_eq!(exit_code, Some(0));
            assert_eq!(signal, None);
            assert!(!truncated);
        }
        other => panic!("expected ok, got {other:?}"),
    }
    harness.assert_clean();
}

#[tokio::test]
async fn test_alias_resolves() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("SHELL", "echo aliased"))
        .await;

    assert_eq!(outcome.output(), Some("aliased\n"));
}

#[tokio::test]
async fn test_stdin_is_delivered() {
    let harness = Harness::new();

    let request = ExecutionRequest::new("sh", "read name\necho \"hello, $name\"").with_stdin("world");
    let outcome = harness.runner.execute(request).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(outcome.output(), Some("hello, world\n"));
    harness.assert_clean();
}

#[tokio::test]
async fn test_missing_stdin_reads_eof() {
    let harness = Harness::new();

    let source = "if read line; then echo \"got $line\"; else echo eof; fi";
    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", source))
        .await;

    assert_eq!(outcome.output(), Some("eof\n"));
}

#[tokio::test]
async fn test_stderr_is_merged() {
    let harness = Harness::new();

    let source = "echo out\necho err >&2\necho out again";
    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", source))
        .await;

    let output = outcome.output().expect("ok outcome carries output");
    assert!(output.contains("out\n"));
    assert!(output.contains("err\n"));
    assert!(output.contains("out again\n"));
}

#[tokio::test]
async fn test_nonzero_exit_is_ok() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "echo partial\nexit 3"))
        .await;

    match outcome {
        Outcome::Ok {
            output, exit_code, ..
        } => {
            assert_eq!(output, "partial\n");
            assert_eq!(exit_code, Some(3));
        }
        other => panic!("expected ok, got {other:?}"),
    }
}

#[tokio::test]
async fn test_signal_death_is_ok_with_signal() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "kill -SEGV $$"))
        .await;

    match outcome {
        Outcome::Ok {
            exit_code, signal, ..
        } => {
            assert_eq!(exit_code, None);
            assert_eq!(signal, Some(libc::SIGSEGV));
        }
        other => panic!("expected ok, got {other:?}"),
    }
}

#[tokio::test]
async fn test_environment_is_scrubbed() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new(
            "sh",
            "echo \"cargo=${CARGO_PKG_NAME:-unset}\"\necho \"home=$HOME\"",
        ))
        .await;

    let output = outcome.output().expect("ok outcome carries output");
    assert!(output.contains("cargo=unset"), "{output}");
    let home = output
        .lines()
        .find_map(|line| line.strip_prefix("home="))
        .expect("home line");
    assert!(
        home.starts_with(&*harness.root.path().to_string_lossy()),
        "HOME should be the workspace, got {home}"
    );
}

#[tokio::test]
async fn test_timeout_kills_descendants() {
    let harness = Harness::new();

    let request = ExecutionRequest::new("sh", "sleep 30 &\necho $!\nwait")
        .with_limits(ResourceLimits::unset().with_wall_time_limit(1.0));
    let started = Instant::now();
    let outcome = harness.runner.execute(request).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    match outcome {
        Outcome::Timeout {
            phase,
            output,
            elapsed_ms,
        } => {
            assert_eq!(phase, Phase::Run);
            assert!(elapsed_ms >= 900, "elapsed {elapsed_ms}ms");
            let pid: u32 = output.trim().parse().expect("background pid in output");
            assert!(
                wait_for_death(pid, Duration::from_secs(2)).await,
                "background sleep {pid} survived the timeout"
            );
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    harness.assert_clean();
}

#[tokio::test]
async fn test_cpu_bound_loop_times_out() {
    // CPU ceiling below the wall clock, in the shipped proportions
    let harness = Harness::with(|config| {
        config.default_limits = config.default_limits.with_overrides(
            &ResourceLimits::unset()
                .with_time_limit(1.0)
                .with_wall_time_limit(3.0),
        );
    });

    let started = Instant::now();
    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "while :; do :; done"))
        .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(
        matches!(
            outcome,
            Outcome::Timeout {
                phase: Phase::Run,
                ..
            }
        ),
        "{outcome:?}"
    );
    harness.assert_clean();
}

#[tokio::test]
async fn test_output_ceiling_truncates() {
    let harness = Harness::new();

    let request = ExecutionRequest::new("sh", "yes")
        .with_limits(ResourceLimits::unset().with_max_output(4));
    let started = Instant::now();
    let outcome = harness.runner.execute(request).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    match outcome {
        Outcome::Ok {
            output, truncated, ..
        } => {
            assert!(truncated);
            assert!(output.len() <= 4 * 1024, "kept {} bytes", output.len());
            assert!(output.starts_with("y\n"));
        }
        other => panic!("expected truncated ok, got {other:?}"),
    }
    harness.assert_clean();
}

#[tokio::test]
async fn test_workspace_files_are_private_to_the_run() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new(
            "sh",
            "echo data > scratch.txt\ncat scratch.txt\npwd",
        ))
        .await;

    let output = outcome.output().expect("ok outcome carries output");
    assert!(output.starts_with("data\n"));
    let workdir = output.lines().nth(1).expect("pwd line");
    assert!(!Path::new(workdir).exists(), "{workdir} outlived its run");
    harness.assert_clean();
}
