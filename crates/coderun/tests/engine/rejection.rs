use coderun::{ExecutionRequest, Outcome, ResourceLimits};

use super::Harness;

#[tokio::test]
async fn test_unknown_language() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("brainfuck", "+++."))
        .await;

    assert_eq!(
        outcome,
        Outcome::UnsupportedLanguage {
            language: "brainfuck".to_owned()
        }
    );
    harness.assert_clean();
}

#[tokio::test]
async fn test_missing_interpreter() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("ghost", "boo"))
        .await;

    assert_eq!(
        outcome,
        Outcome::ToolchainUnavailable {
            language: "ghost".to_owned(),
            program: "coderun-no-such-interpreter".to_owned(),
        }
    );
    assert!(outcome.is_infrastructure_failure());
    harness.assert_clean();
}

#[tokio::test]
async fn test_empty_source() {
    let harness = Harness::new();

    for source in ["", "   \n\t"] {
        let outcome = harness
            .runner
            .execute(ExecutionRequest::new("sh", source))
            .await;
        assert!(
            matches!(outcome, Outcome::InvalidRequest { .. }),
            "{source:?} gave {outcome:?}"
        );
    }
    harness.assert_clean();
}

#[tokio::test]
async fn test_empty_language() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("", "echo hi"))
        .await;

    assert!(matches!(outcome, Outcome::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_oversized_source_and_stdin() {
    let harness = Harness::new();

    let big = "x".repeat(8 * 1024);
    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", format!("# {big}")))
        .await;
    assert!(matches!(outcome, Outcome::InvalidRequest { .. }));

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "cat").with_stdin(big))
        .await;
    assert!(matches!(outcome, Outcome::InvalidRequest { .. }));
    harness.assert_clean();
}

#[tokio::test]
async fn test_non_positive_wall_limit() {
    let harness = Harness::new();

    let request = ExecutionRequest::new("sh", "echo hi")
        .with_limits(ResourceLimits::unset().with_wall_time_limit(0.0));
    let outcome = harness.runner.execute(request).await;

    assert!(matches!(outcome, Outcome::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_outcome_serializes_with_status_tag() {
    let harness = Harness::new();

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("brainfuck", "+"))
        .await;
    let json = serde_json::to_value(&outcome).unwrap();

    assert_eq!(json["status"], "unsupportedLanguage");
    assert_eq!(json["language"], "brainfuck");
}
