use std::time::Duration;

use coderun::{ExecutionRequest, Outcome};

use super::Harness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_executions_are_isolated() {
    let harness = Harness::new();

    let mut handles = Vec::new();
    for i in 0..8 {
        let runner = harness.runner.clone();
        // Each run leaves a marker, waits for the others, then checks that
        // both the marker and main.sh are still its own
        let source = format!(
            "# MARKER_{i}\necho {i} > marker\nsleep 0.2\nls\ncat marker\n\
             grep -q MARKER_{i} main.sh && echo own-source"
        );
        handles.push(tokio::spawn(async move {
            runner.execute(ExecutionRequest::new("sh", source)).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome.output(),
            Some(format!("main.sh\nmarker\n{i}\nown-source\n").as_str()),
            "run {i}"
        );
    }
    harness.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overload_is_rejected() {
    let harness = Harness::with(|config| config.max_concurrent = 2);
    assert_eq!(harness.runner.available_slots(), 2);

    let mut busy = Vec::new();
    for _ in 0..2 {
        let runner = harness.runner.clone();
        busy.push(tokio::spawn(async move {
            runner
                .execute(ExecutionRequest::new("sh", "sleep 1\necho done"))
                .await
        }));
    }

    let mut waited = Duration::ZERO;
    while harness.runner.available_slots() > 0 {
        assert!(waited < Duration::from_secs(5), "slots were never taken");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "echo third"))
        .await;
    assert_eq!(outcome, Outcome::Overloaded);
    assert!(outcome.is_infrastructure_failure());

    for handle in busy {
        assert_eq!(handle.await.unwrap().output(), Some("done\n"));
    }
    assert_eq!(harness.runner.available_slots(), 2);

    let outcome = harness
        .runner
        .execute(ExecutionRequest::new("sh", "echo fourth"))
        .await;
    assert_eq!(outcome.output(), Some("fourth\n"));
    harness.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_wait_queues_briefly() {
    let harness = Harness::with(|config| {
        config.max_concurrent = 1;
        config.admission_wait = 5.0;
    });

    let first = {
        let runner = harness.runner.clone();
        tokio::spawn(async move {
            runner
                .execute(ExecutionRequest::new("sh", "sleep 0.5\necho first"))
                .await
        })
    };
    while harness.runner.available_slots() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = harness
        .runner
        .execute(ExecutionRequest::new("sh", "echo second"))
        .await;

    assert_eq!(first.await.unwrap().output(), Some("first\n"));
    assert_eq!(second.output(), Some("second\n"));
    harness.assert_clean();
}
