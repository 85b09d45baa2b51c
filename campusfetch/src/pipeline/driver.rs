//! The pipeline driver.
//!
//! Sequences one collection run:
//! `Start -> IdentityResolved -> Wave(0..k) -> Expand -> FinalWave -> Done`.
//! A missing identity aborts before any other task runs. Waves never fail as
//! a whole; the summary records every task outcome and the configured
//! [`SuccessPolicy`](super::SuccessPolicy) turns it into a verdict.

use super::plan::PipelinePlan;
use super::retry::RetryExecutor;
use super::summary::{PipelineSummary, WaveSummary};
use super::wave::{Wave, WaveRunner};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::context::{CollectionRequest, IdentityResult, TaskContext};
use crate::core::PipelineState;
use crate::errors::{panic_message, CampusfetchError};
use crate::events::{ProgressHandle, ProgressReporter, ProgressSink};
use crate::observability::SpanTimer;
use crate::tasks::IdentityResolver;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Runs a [`PipelinePlan`] for collection requests.
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    config: PipelineConfig,
    resolver: Arc<dyn IdentityResolver>,
    plan: PipelinePlan,
}

impl PipelineDriver {
    /// Creates a driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn IdentityResolver>,
        plan: PipelinePlan,
    ) -> Result<Self, CampusfetchError> {
        config.validate()?;
        Ok(Self {
            config,
            resolver,
            plan,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The plan.
    #[must_use]
    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// Runs the pipeline for `request`, reporting to `sink`.
    ///
    /// Never returns an error and never panics: failures of every kind end
    /// up in the summary.
    pub async fn run_pipeline(
        &self,
        request: CollectionRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> PipelineSummary {
        self.run_with_cancel(request, sink, Arc::new(CancellationToken::new()))
            .await
    }

    /// Like [`Self::run_pipeline`], but fails when the identity cannot be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`CampusfetchError::Cancelled`] when the deadline fired before
    /// the identity was known, and [`CampusfetchError::IdentityUnresolved`]
    /// for any other aborted run.
    pub async fn try_run(
        &self,
        request: CollectionRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<PipelineSummary, CampusfetchError> {
        let summary = self.run_pipeline(request, sink).await;
        if summary.final_state == PipelineState::Aborted {
            if let Some(reason) = &summary.cancel_reason {
                return Err(CampusfetchError::Cancelled(reason.clone()));
            }
            return Err(CampusfetchError::identity_unresolved(
                summary.request.name.clone(),
                summary.error.clone().unwrap_or_default(),
            ));
        }
        Ok(summary)
    }

    /// Runs the pipeline under a caller-owned cancellation token.
    ///
    /// Cancelling the token winds the run down: pending tasks settle as
    /// cancelled and the run still reaches a terminal state.
    pub async fn run_with_cancel(
        &self,
        request: CollectionRequest,
        sink: Arc<dyn ProgressSink>,
        cancel: Arc<CancellationToken>,
    ) -> PipelineSummary {
        let timer = SpanTimer::start("pipeline");
        let ctx = TaskContext::new(request.clone()).with_cancel_token(cancel);
        let mut summary = PipelineSummary::new(ctx.run_id(), request);

        let reporter = ProgressReporter::spawn(sink, self.config.progress_queue_capacity);
        let progress = reporter.handle();

        let span = info_span!(
            "pipeline",
            run_id = %ctx.run_id(),
            institution = %ctx.request().name,
            started_at = %summary.started_at.to_rfc3339(),
        );
        let watch = CancelWatch::register(ctx.cancel_token(), span.clone());
        let deadline = self.config.deadline().map(|limit| {
            AbortOnDrop(
                ctx.cancel_token()
                    .cancel_after(limit, format!("deadline of {limit:?} exceeded")),
            )
        });
        let outcome = AssertUnwindSafe(
            self.execute(&ctx, &progress, &mut summary)
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await;

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            span.in_scope(|| {
                error!(
                    from = %summary.final_state,
                    error = %message,
                    "Pipeline panicked"
                );
            });
            summary.final_state = PipelineState::Errored;
            summary.error = Some(message);
            progress.status(format!(
                "Data collection failed for {}",
                summary.request.name
            ));
        }

        drop(deadline);
        drop(watch);

        drop(progress);
        let metrics = reporter
            .finish(self.config.progress_drain_timeout())
            .await;
        summary.progress = metrics.to_dict();
        summary.duration_ms = timer.finish();
        summary.verdict = summary.evaluate(self.config.success_policy);

        span.in_scope(|| {
            info!(
                final_state = %summary.final_state,
                verdict = ?summary.verdict,
                succeeded = summary.succeeded_tasks(),
                failed = summary.failed_tasks(),
                duration_ms = summary.duration_ms,
                "Pipeline finished"
            );
        });
        summary
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        progress: &ProgressHandle,
        summary: &mut PipelineSummary,
    ) {
        let name = ctx.request().name.clone();
        progress.status(format!("Resolving {name}"));

        let Some(identity) = self.resolve_identity(ctx, summary).await else {
            transition(summary, PipelineState::Aborted);
            let reason = summary.error.clone().unwrap_or_default();
            warn!(reason = %reason, "Identity unresolved, aborting");
            progress.status(format!("Could not identify {name}: {reason}"));
            return;
        };
        summary.identity = Some(identity);
        transition(summary, PipelineState::IdentityResolved);

        let ctx = ctx.with_identity(identity);
        let runner = WaveRunner::new(
            RetryExecutor::new(self.config.retry.clone()),
            self.config.max_concurrency,
        );

        for (index, wave) in self.plan.waves().iter().enumerate() {
            if index > 0 {
                self.cooldown(&ctx).await;
            }
            transition(summary, PipelineState::Wave(index));
            let result = runner.run_wave(wave.clone(), &ctx, progress).await;
            summary.waves.push(WaveSummary::from_result(&result, false));
        }

        if let Some(step) = self.plan.expansion() {
            if !self.plan.waves().is_empty() {
                self.cooldown(&ctx).await;
            }
            transition(summary, PipelineState::Expand);

            let expansion = runner
                .executor()
                .execute(&step.name, ctx.cancel_token(), || {
                    step.expander.expand(&identity)
                })
                .await;

            match expansion.result {
                Ok(tasks) => {
                    info!(wave = %step.name, tasks = tasks.len(), "Dependent tasks built");
                    transition(summary, PipelineState::FinalWave);
                    let wave = Wave {
                        name: step.name.clone(),
                        tasks,
                        milestone: step.milestone.clone(),
                    };
                    let result = runner.run_wave(wave, &ctx, progress).await;
                    summary.waves.push(WaveSummary::from_result(&result, true));
                }
                Err(e) => {
                    error!(
                        wave = %step.name,
                        attempts = expansion.state.attempts,
                        error = %e,
                        "Could not build dependent tasks"
                    );
                    summary
                        .waves
                        .push(WaveSummary::expansion_failed(&step.name, e.to_string()));
                    progress.status(format!("Skipped {}: {e}", step.name));
                }
            }
        }

        transition(summary, PipelineState::Done);
        if ctx.is_cancelled() {
            let reason = ctx.cancel_token().reason().unwrap_or_default();
            progress.status(format!("Data collection stopped for {name}: {reason}"));
            summary.cancel_reason = Some(reason);
            return;
        }
        progress.progress(100);
        progress.status(format!("Data collection completed for {name}"));
    }

    async fn resolve_identity(
        &self,
        ctx: &TaskContext,
        summary: &mut PipelineSummary,
    ) -> Option<IdentityResult> {
        let lookup = ctx
            .cancel_token()
            .run_until_cancelled(self.resolver.resolve(ctx.request()))
            .await;

        let reason = match lookup {
            Some(Ok(identity)) if identity.is_resolved() => return Some(identity),
            Some(Ok(_)) => "no entity id returned".to_string(),
            Some(Err(e)) => e.to_string(),
            None => {
                let cancelled = ctx.cancel_token().reason().unwrap_or_default();
                summary.cancel_reason = Some(cancelled.clone());
                format!("cancelled: {cancelled}")
            }
        };
        summary.error = Some(reason);
        None
    }

    async fn cooldown(&self, ctx: &TaskContext) {
        let cooldown = self.config.cooldown();
        if cooldown.is_zero() {
            return;
        }
        if !ctx.cancel_token().sleep(cooldown).await {
            warn!("Cooldown interrupted by cancellation");
        }
    }
}

/// Aborts the deadline timer when the run ends or its future is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Logs the cancellation of a run while the run is still in flight.
///
/// The callback stays registered on a caller-owned token after the run, so
/// dropping the watch disarms it.
struct CancelWatch {
    armed: Arc<AtomicBool>,
}

impl CancelWatch {
    fn register(token: &Arc<CancellationToken>, span: Span) -> Self {
        let armed = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&armed);
        let weak: Weak<CancellationToken> = Arc::downgrade(token);
        token.on_cancel(move || {
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            let reason = weak.upgrade().and_then(|t| t.reason()).unwrap_or_default();
            span.in_scope(|| warn!(reason = %reason, "Pipeline cancelled"));
        });
        Self { armed }
    }
}

impl Drop for CancelWatch {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

fn transition(summary: &mut PipelineSummary, next: PipelineState) {
    let from = summary.final_state;
    debug_assert!(
        from.can_transition_to(next),
        "illegal pipeline transition {from} -> {next}"
    );
    info!(from = %from, to = %next, "Pipeline state changed");
    summary.final_state = next;
}
