//! Test assertions for pipeline summaries.

use crate::core::PipelineState;
use crate::pipeline::{PipelineSummary, Verdict, WaveSummary};

fn wave<'a>(summary: &'a PipelineSummary, name: &str) -> &'a WaveSummary {
    summary.wave(name).unwrap_or_else(|| {
        panic!(
            "Expected wave '{}', got waves {:?}",
            name,
            summary.waves.iter().map(|w| &w.name).collect::<Vec<_>>()
        )
    })
}

/// Asserts that the run ended in `expected`.
pub fn assert_final_state(summary: &PipelineSummary, expected: PipelineState) {
    assert_eq!(
        summary.final_state, expected,
        "Expected final state {:?}, got {:?} (error: {:?})",
        expected, summary.final_state, summary.error
    );
}

/// Asserts the verdict of the run.
pub fn assert_verdict(summary: &PipelineSummary, expected: Verdict) {
    assert_eq!(
        summary.verdict, expected,
        "Expected verdict {:?}, got {:?}",
        expected, summary.verdict
    );
}

/// Asserts that every task of a wave succeeded.
pub fn assert_wave_succeeded(summary: &PipelineSummary, name: &str) {
    let wave = wave(summary, name);
    assert!(
        wave.is_clean(),
        "Expected wave '{}' to succeed, got {} failures (error: {:?})",
        name,
        wave.failed,
        wave.error
    );
}

/// Asserts the number of tasks a wave ran.
pub fn assert_wave_len(summary: &PipelineSummary, name: &str, expected: usize) {
    let wave = wave(summary, name);
    assert_eq!(
        wave.tasks.len(),
        expected,
        "Expected wave '{}' to run {} tasks, got {}",
        name,
        expected,
        wave.tasks.len()
    );
}

/// Asserts that a named task failed in a wave.
pub fn assert_task_failed(summary: &PipelineSummary, wave_name: &str, task: &str) {
    let wave = wave(summary, wave_name);
    let record = wave.tasks.iter().find(|t| t.task == task);
    assert!(
        record.is_some_and(|r| r.status == "failure"),
        "Expected task '{task}' in wave '{wave_name}' to fail, got {record:?}"
    );
}
