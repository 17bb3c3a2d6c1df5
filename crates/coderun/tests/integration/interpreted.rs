use std::time::{Duration, Instant};

use coderun::{ExecutionRequest, Outcome, Phase, ResourceLimits};

use super::{assert_clean, fixture_source, test_runner};

#[tokio::test]
async fn test_python_hello_world() {
    let (root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("python", fixture_source("hello.py")))
        .await;

    assert_eq!(outcome.output(), Some("Hello, World!\n"));
    assert_clean(&root);
}

#[tokio::test]
async fn test_python_echoes_stdin() {
    let (_root, runner) = test_runner();

    let request = ExecutionRequest::new("py", fixture_source("echo.py")).with_stdin("one\ntwo");
    let outcome = runner.execute(request).await;

    assert_eq!(outcome.output(), Some("one\ntwo\n"));
}

#[tokio::test]
async fn test_python_syntax_error_is_ok_with_traceback() {
    let (_root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("python", fixture_source("syntax_error.py")))
        .await;

    match outcome {
        Outcome::Ok {
            output, exit_code, ..
        } => {
            assert_ne!(exit_code, Some(0));
            assert!(output.contains("SyntaxError"), "{output}");
        }
        other => panic!("expected ok, got {other:?}"),
    }
}

#[tokio::test]
async fn test_python_infinite_loop_times_out() {
    let (root, runner) = test_runner();

    let request = ExecutionRequest::new("python", fixture_source("infinite_loop.py"))
        .with_limits(ResourceLimits::unset().with_wall_time_limit(1.0));
    let started = Instant::now();
    let outcome = runner.execute(request).await;

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
    assert_clean(&root);
}

#[tokio::test]
async fn test_node_hello_world() {
    let (_root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("js", fixture_source("hello.js")))
        .await;

    assert_eq!(outcome.output(), Some("Hello, World!\n"));
}

#[tokio::test]
async fn test_node_reads_stdin() {
    let (_root, runner) = test_runner();

    let request = ExecutionRequest::new("javascript", fixture_source("sum.js")).with_stdin("40 2");
    let outcome = runner.execute(request).await;

    assert_eq!(outcome.output(), Some("42\n"));
}
