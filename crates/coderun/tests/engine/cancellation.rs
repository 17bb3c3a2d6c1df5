use std::time::{Duration, Instant};

use coderun::{CancellationToken, ExecutionRequest, Outcome};

use super::Harness;

#[tokio::test]
async fn test_cancel_running_program() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let outcome = harness
        .runner
        .execute_with_cancel(ExecutionRequest::new("sh", "sleep 30"), cancel)
        .await;
    trigger.await.unwrap();

    assert_eq!(outcome, Outcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(3));
    harness.assert_clean();
}

#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness
        .runner
        .execute_with_cancel(ExecutionRequest::new("sh", "echo never"), cancel)
        .await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(harness.runner.available_slots(), 8);
    harness.assert_clean();
}

#[tokio::test]
async fn test_dropped_execution_cleans_up() {
    let harness = Harness::new();

    let result = tokio::time::timeout(
        Duration::from_millis(500),
        harness
            .runner
            .execute(ExecutionRequest::new("sh", "sleep 30")),
    )
    .await;

    assert!(result.is_err(), "execution should still have been running");
    assert_eq!(harness.runner.available_slots(), 8);
    harness.assert_clean();
}
