//! Public API tests for the pipeline driver.

use campusfetch::prelude::*;
use campusfetch::testing::{instant_config, CollectingProgressSink, StaticIdentity};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn counting_task(name: &str, counter: Arc<AtomicUsize>) -> Arc<dyn Task> {
    Arc::new(FnTask::new(name, move |ctx: TaskContext| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "entity_id": ctx.entity_id() }))
        }
    }))
}

#[tokio::test]
async fn try_run_reports_unresolved_identity_as_error() {
    let counter = Arc::new(AtomicUsize::new(0));
    let plan = PlanBuilder::new("api")
        .wave(Wave::new("only").task(counting_task("a", counter.clone())))
        .build()
        .unwrap();
    let driver = PipelineDriver::new(instant_config(), Arc::new(StaticIdentity::unresolved()), plan)
        .unwrap();

    let result = driver
        .try_run(
            CollectionRequest::new("Ghost College"),
            Arc::new(NoOpProgressSink),
        )
        .await;

    let err = assert_err!(result);
    assert!(matches!(err, CampusfetchError::IdentityUnresolved { ref name, .. } if name == "Ghost College"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn try_run_returns_summary_for_completed_run() {
    let counter = Arc::new(AtomicUsize::new(0));
    let plan = PlanBuilder::new("api")
        .wave(
            Wave::new("first")
                .task(counting_task("a", counter.clone()))
                .task(counting_task("b", counter.clone()))
                .with_milestone(40, "First wave done"),
        )
        .wave(
            Wave::new("second")
                .task(counting_task("c", counter.clone()))
                .with_milestone(80, "Second wave done"),
        )
        .build()
        .unwrap();
    let driver =
        PipelineDriver::new(instant_config(), Arc::new(StaticIdentity::resolved(42)), plan).unwrap();
    let sink = Arc::new(CollectingProgressSink::new());

    let summary = assert_ok!(
        driver
            .try_run(
                CollectionRequest::new("Real College").with_region("Kerala"),
                sink.clone(),
            )
            .await
    );

    assert_eq!(summary.final_state, PipelineState::Done);
    assert!(summary.verdict.is_success());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(summary.total_tasks(), 3);
    assert_eq!(sink.percents(), vec![40, 80, 100]);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["request"]["region"], "Kerala");
    assert_eq!(json["verdict"], "succeeded");
    assert_eq!(json["waves"][1]["name"], "second");
}

#[tokio::test]
async fn config_file_drives_the_driver() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "cooldown_ms": 0,
            "max_concurrency": 2,
            "retry": {{ "max_retries": 0, "pacing_ms": 0, "base_delay_ms": 0 }},
            "success_policy": {{ "mode": "best_effort" }}
        }}"#
    )
    .unwrap();
    let config = assert_ok!(PipelineConfig::from_file(file.path()));
    assert_eq!(config.retry.max_retries, 0);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let failing: Arc<dyn Task> = Arc::new(FnTask::new("always_down", move |_ctx: TaskContext| {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::failed("service unavailable"))
        }
    }));
    let plan = PlanBuilder::new("cfg")
        .wave(Wave::new("w").task(failing))
        .build()
        .unwrap();

    let summary = PipelineDriver::new(config, Arc::new(StaticIdentity::resolved(1)), plan)
        .unwrap()
        .run_pipeline(CollectionRequest::new("X"), Arc::new(LoggingProgressSink::default()))
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(summary.failed_tasks(), 1);
    assert_eq!(summary.verdict, Verdict::Succeeded);
}

#[tokio::test]
async fn drivers_can_run_concurrently() {
    let counter = Arc::new(AtomicUsize::new(0));
    let plan = PlanBuilder::new("shared")
        .wave(Wave::new("w").task(counting_task("a", counter.clone())))
        .build()
        .unwrap();
    let driver = Arc::new(
        PipelineDriver::new(instant_config(), Arc::new(StaticIdentity::resolved(5)), plan).unwrap(),
    );

    let handles: Vec<_> = ["One", "Two", "Three"]
        .into_iter()
        .map(|name| {
            let driver = driver.clone();
            tokio::spawn(async move {
                driver
                    .run_pipeline(CollectionRequest::new(name), Arc::new(NoOpProgressSink))
                    .await
            })
        })
        .collect();

    let mut run_ids = Vec::new();
    for handle in handles {
        let summary = handle.await.unwrap();
        assert_eq!(summary.final_state, PipelineState::Done);
        run_ids.push(summary.run_id);
    }
    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}
