//! End-to-end runs of the driver over the standard plan.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::context::CollectionRequest;
    use crate::core::PipelineState;
    use crate::events::{CallbackSink, CollectingProgressSink, ProgressSink};
    use crate::pipeline::{
        PipelineDriver, PipelinePlan, PlanBuilder, Record, RetryPolicy, SuccessPolicy, Verdict,
        Wave,
    };
    use crate::tasks::{IdentityResolver, Task};
    use crate::testing::{
        assert_final_state, assert_task_failed, assert_verdict, assert_wave_len,
        assert_wave_succeeded, instant_config, InMemoryStore, ScriptedTask, StaticIdentity,
        TableSource, UpsertTask,
    };
    use crate::topics::{standard_plan, QuotaCategory, Topic, TopicRegistry, WAVE_ONE, WAVE_TWO};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Fixture {
        store: Arc<InMemoryStore>,
        courses: Arc<TableSource>,
        plan: PipelinePlan,
    }

    fn fixture(course_ids: &[i64], courses_source: impl FnOnce(Arc<InMemoryStore>) -> TableSource) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = TopicRegistry::new();
        for topic in WAVE_ONE.into_iter().chain(WAVE_TWO) {
            let task: Arc<dyn Task> = if topic == Topic::Courses {
                Arc::new(UpsertTask::new(
                    "courses",
                    store.clone(),
                    "courses",
                    course_ids.iter().map(|id| Record::new(*id)).collect(),
                ))
            } else {
                Arc::new(UpsertTask::new(
                    topic.as_str(),
                    store.clone(),
                    topic.as_str(),
                    vec![Record::new(1)],
                ))
            };
            registry = registry.register(topic, task);
        }

        let bond_store = store.clone();
        let registry = registry.with_bonds(move |course, quota| {
            let offset = match quota {
                QuotaCategory::AllIndia => 0,
                QuotaCategory::State => 1,
            };
            Arc::new(UpsertTask::new(
                format!("bond:{}:{quota}", course.id),
                bond_store.clone(),
                "bonds",
                vec![Record::new(course.id * 10 + offset)],
            )) as Arc<dyn Task>
        });

        let courses = Arc::new(courses_source(store.clone()));
        let plan = standard_plan(&registry, courses.clone()).unwrap();
        Fixture {
            store,
            courses,
            plan,
        }
    }

    fn table(store: Arc<InMemoryStore>) -> TableSource {
        TableSource::new(store, "courses")
    }

    fn driver(config: PipelineConfig, resolver: Arc<dyn IdentityResolver>, plan: PipelinePlan) -> PipelineDriver {
        PipelineDriver::new(config, resolver, plan).unwrap()
    }

    #[tokio::test]
    async fn test_unresolved_identity_runs_nothing() {
        let fx = fixture(&[1, 2], table);
        let resolver = Arc::new(StaticIdentity::unresolved());
        let sink = Arc::new(CollectingProgressSink::new());

        let summary = driver(instant_config(), resolver.clone(), fx.plan)
            .run_pipeline(CollectionRequest::new("Unknown Institute"), sink.clone())
            .await;

        assert_final_state(&summary, PipelineState::Aborted);
        assert_verdict(&summary, Verdict::Aborted);
        assert_eq!(resolver.calls(), 1);
        assert_eq!(fx.store.write_count(), 0);
        assert_eq!(fx.courses.reads(), 0);

        let statuses = sink.statuses();
        let terminal: Vec<_> = statuses
            .iter()
            .filter(|s| s.starts_with("Could not identify"))
            .collect();
        assert_eq!(terminal.len(), 1);
        assert!(!statuses.iter().any(|s| s.contains("completed")));
    }

    #[tokio::test]
    async fn test_flaky_task_recovers_within_budget() {
        let tasks: Vec<Arc<ScriptedTask>> = (1..=5)
            .map(|i| {
                let task = ScriptedTask::new(format!("task{i}"));
                Arc::new(if i == 3 { task.failing_times(2) } else { task })
            })
            .collect();
        let wave = Wave::new("wave_1")
            .with_tasks(tasks.iter().map(|t| t.clone() as Arc<dyn Task>))
            .with_milestone(50, "Wave one done");
        let plan = PlanBuilder::new("flaky").wave(wave).build().unwrap();

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(42)), plan)
            .run_pipeline(
                CollectionRequest::new("Flaky College"),
                Arc::new(CollectingProgressSink::new()),
            )
            .await;

        assert_final_state(&summary, PipelineState::Done);
        assert_wave_succeeded(&summary, "wave_1");
        let records = &summary.waves[0].tasks;
        assert_eq!(records.len(), 5);
        assert_eq!(records[2].task, "task3");
        assert_eq!(records[2].attempts, 3);
        assert!(records
            .iter()
            .enumerate()
            .all(|(i, r)| i == 2 || r.attempts == 1));
        assert_eq!(tasks[2].calls(), 3);
    }

    #[tokio::test]
    async fn test_standard_plan_fans_out_bonds() {
        let fx = fixture(&[101, 102, 103], table);
        let sink = Arc::new(CollectingProgressSink::new());

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(42)), fx.plan)
            .run_pipeline(CollectionRequest::new("Model College"), sink.clone())
            .await;

        assert_final_state(&summary, PipelineState::Done);
        assert_verdict(&summary, Verdict::Succeeded);
        assert_wave_len(&summary, "courses_and_rankings", 4);
        assert_wave_len(&summary, "admissions", 4);
        assert_wave_len(&summary, "bonds", 6);
        assert!(summary.wave("bonds").is_some_and(|w| w.dynamic));
        assert_eq!(fx.store.row_count("bonds"), 6);
        assert_eq!(sink.percents(), vec![30, 60, 90, 100]);
        assert!(sink
            .statuses()
            .last()
            .is_some_and(|s| s == "Data collection completed for Model College"));
    }

    #[tokio::test]
    async fn test_no_courses_means_empty_bond_wave() {
        let fx = fixture(&[], table);
        let sink = Arc::new(CollectingProgressSink::new());

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(7)), fx.plan)
            .run_pipeline(CollectionRequest::new("Tiny College"), sink.clone())
            .await;

        assert_final_state(&summary, PipelineState::Done);
        assert_wave_len(&summary, "bonds", 0);
        assert_eq!(fx.store.row_count("bonds"), 0);
        assert_eq!(sink.percents().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let fx = fixture(&[1, 2], table);
        let driver = driver(instant_config(), Arc::new(StaticIdentity::resolved(3)), fx.plan);
        let request = CollectionRequest::new("Repeat College").with_year(2025);

        driver
            .run_pipeline(request.clone(), Arc::new(CollectingProgressSink::new()))
            .await;
        let rows = fx.store.total_rows();
        let writes = fx.store.write_count();

        driver
            .run_pipeline(request, Arc::new(CollectingProgressSink::new()))
            .await;
        assert_eq!(fx.store.total_rows(), rows);
        assert_eq!(fx.store.write_count(), writes * 2);
    }

    #[tokio::test]
    async fn test_expansion_read_is_retried() {
        let fx = fixture(&[1], |store| table(store).failing_first(1));

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(1)), fx.plan)
            .run_pipeline(
                CollectionRequest::new("X"),
                Arc::new(CollectingProgressSink::new()),
            )
            .await;

        assert_eq!(fx.courses.reads(), 2);
        assert_wave_len(&summary, "bonds", 2);
        assert_verdict(&summary, Verdict::Succeeded);
    }

    #[tokio::test]
    async fn test_expansion_failure_is_recorded() {
        let fx = fixture(&[1], |store| table(store).failing_first(10));
        let sink = Arc::new(CollectingProgressSink::new());

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(1)), fx.plan)
            .run_pipeline(CollectionRequest::new("X"), sink.clone())
            .await;

        assert_eq!(fx.courses.reads(), 3);
        assert_final_state(&summary, PipelineState::Done);
        assert!(summary.expansion_failed());
        assert_verdict(&summary, Verdict::PartialFailure);
        assert_eq!(sink.percents(), vec![30, 60, 100]);
    }

    #[tokio::test]
    async fn test_failed_task_is_isolated_and_judged_by_policy() {
        let plan = PlanBuilder::new("mixed")
            .wave(
                Wave::new("wave_1")
                    .task(Arc::new(ScriptedTask::new("good1")))
                    .task(Arc::new(ScriptedTask::new("bad").always_failing()))
                    .task(Arc::new(ScriptedTask::new("good2")))
                    .task(Arc::new(ScriptedTask::new("good3"))),
            )
            .build()
            .unwrap();

        let strict = driver(instant_config(), Arc::new(StaticIdentity::resolved(1)), plan.clone())
            .run_pipeline(CollectionRequest::new("X"), Arc::new(CollectingProgressSink::new()))
            .await;
        assert_task_failed(&strict, "wave_1", "bad");
        assert_eq!(strict.succeeded_tasks(), 3);
        assert_verdict(&strict, Verdict::PartialFailure);

        let lenient = driver(
            instant_config().with_success_policy(SuccessPolicy::Threshold(0.75)),
            Arc::new(StaticIdentity::resolved(1)),
            plan,
        )
        .run_pipeline(CollectionRequest::new("X"), Arc::new(CollectingProgressSink::new()))
        .await;
        assert_verdict(&lenient, Verdict::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_task_waits_longer() {
        let config = PipelineConfig::default()
            .with_cooldown_ms(0)
            .with_retry(
                RetryPolicy::new()
                    .with_pacing_ms(0)
                    .with_base_delay_ms(2_000)
                    .with_rate_limit_delay_ms(10_000),
            );
        let plan = PlanBuilder::new("rate")
            .wave(Wave::new("w").task(Arc::new(ScriptedTask::new("model").rate_limited_times(1))))
            .build()
            .unwrap();

        let start = tokio::time::Instant::now();
        let summary = driver(config, Arc::new(StaticIdentity::resolved(1)), plan)
            .run_pipeline(CollectionRequest::new("X"), Arc::new(CollectingProgressSink::new()))
            .await;

        assert_verdict(&summary, Verdict::Succeeded);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_panicking_sink_does_not_break_run() {
        let sink = Arc::new(CallbackSink::new().with_progress(|p| {
            if p >= 100 {
                panic!("observer bug");
            }
        }));
        let fx = fixture(&[1], table);

        let summary = driver(instant_config(), Arc::new(StaticIdentity::resolved(1)), fx.plan)
            .run_pipeline(CollectionRequest::new("X"), sink)
            .await;

        assert_final_state(&summary, PipelineState::Done);
        assert_eq!(summary.progress["sink_panics"], 1);
    }

    struct StuckSink {
        release: Notify,
    }

    #[async_trait]
    impl ProgressSink for StuckSink {
        async fn on_progress(&self, _percent: u8) {
            self.release.notified().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_observer_never_blocks_pipeline() {
        let fx = fixture(&[1, 2], table);
        let config = instant_config().with_progress_queue_capacity(1);
        let sink = Arc::new(StuckSink {
            release: Notify::new(),
        });

        let summary = driver(config, Arc::new(StaticIdentity::resolved(1)), fx.plan)
            .run_pipeline(CollectionRequest::new("X"), sink)
            .await;

        assert_final_state(&summary, PipelineState::Done);
        assert_eq!(fx.store.row_count("bonds"), 4);
        assert!(summary.progress["dropped"].as_u64().is_some_and(|d| d > 0));
    }
}
