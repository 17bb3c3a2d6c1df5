use coderun::{ExecutionRequest, Outcome};

use super::{assert_clean, fixture_source, test_runner};

#[tokio::test]
async fn test_java_public_class_names_the_file() {
    let (root, runner) = test_runner();

    let request =
        ExecutionRequest::new("java", fixture_source("Greeter.java")).with_stdin("coderun");
    let outcome = runner.execute(request).await;

    assert_eq!(outcome.output(), Some("Hello, coderun!\n"));
    assert_clean(&root);
}

#[tokio::test]
async fn test_java_falls_back_to_main() {
    let (_root, runner) = test_runner();

    let outcome = runner
        .execute(ExecutionRequest::new("java", fixture_source("unnamed.java")))
        .await;

    assert_eq!(outcome.output(), Some("Hello from Main\n"));
}

#[tokio::test]
async fn test_java_compile_error() {
    let (_root, runner) = test_runner();

    let source = "public class Broken { void f() { int x = \"text\"; } }";
    let outcome = runner.execute(ExecutionRequest::new("java", source)).await;

    match outcome {
        Outcome::CompileError { output } => assert!(output.contains("Broken.java"), "{output}"),
        other => panic!("expected compile error, got {other:?}"),
    }
}
