use coderun::{ExecutionRequest, Outcome};

use super::{assert_clean, fixture_source, test_runner};

#[tokio::test]
async fn test_c_hello_world() {
    let (root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("c", fixture_source("hello.c")))
        .await;

    assert_eq!(outcome.output(), Some("Hello, World!\n"));
    assert_clean(&root);
}

#[tokio::test]
async fn test_cpp_echoes_stdin() {
    let (_root, runner) = test_runner();

    let request =
        ExecutionRequest::new("cpp", fixture_source("echo.cpp")).with_stdin("test input");
    let outcome = runner.execute(request).await;

    assert_eq!(outcome.output(), Some("test input\n"));
}

#[tokio::test]
async fn test_cpp_compile_error() {
    let (root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("c++", fixture_source("compile_error.cpp")))
        .await;

    match outcome {
        Outcome::CompileError { output } => {
            assert!(output.contains("undefined_variable"), "{output}");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
    assert_clean(&root);
}

#[tokio::test]
async fn test_c_segfault_reports_signal() {
    let (_root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("c", fixture_source("segfault.c")))
        .await;

    match outcome {
        Outcome::Ok { signal, .. } => assert_eq!(signal, Some(libc::SIGSEGV)),
        other => panic!("expected ok, got {other:?}"),
    }
}
