//! Pipeline state machine states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// States of a pipeline run.
///
/// `Start -> IdentityResolved -> Wave(i)... -> Expand -> FinalWave -> Done`.
/// `Aborted` is reachable only before any wave runs; `Errored` marks a run
/// stopped by an unexpected panic caught at the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "index")]
pub enum PipelineState {
    /// Nothing has run yet.
    Start,
    /// The identity lookup produced an entity id.
    IdentityResolved,
    /// Static wave `i` (zero-based) is running or has just settled.
    Wave(usize),
    /// Dependent tasks are being built from storage.
    Expand,
    /// The dynamic wave is running.
    FinalWave,
    /// All waves settled.
    Done,
    /// The identity precondition failed.
    Aborted,
    /// An unexpected panic stopped the run.
    Errored,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Start
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::IdentityResolved => write!(f, "identity_resolved"),
            Self::Wave(i) => write!(f, "wave_{}", i + 1),
            Self::Expand => write!(f, "expand"),
            Self::FinalWave => write!(f, "final_wave"),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl PipelineState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Errored)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (*self, next) {
            (Self::Start, Self::IdentityResolved | Self::Aborted)
            | (Self::IdentityResolved, Self::Wave(0) | Self::Expand | Self::Done | Self::Aborted)
            | (Self::Wave(_), Self::Expand | Self::Done)
            | (Self::Expand, Self::FinalWave | Self::Done)
            | (Self::FinalWave, Self::Done) => true,
            (Self::Wave(i), Self::Wave(j)) => j == i + 1,
            (from, Self::Errored) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PipelineState::Wave(0).to_string(), "wave_1");
        assert_eq!(PipelineState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_abort_only_from_start_or_identity() {
        assert!(PipelineState::Start.can_transition_to(PipelineState::Aborted));
        assert!(PipelineState::IdentityResolved.can_transition_to(PipelineState::Aborted));
        assert!(!PipelineState::Wave(0).can_transition_to(PipelineState::Aborted));
        assert!(!PipelineState::FinalWave.can_transition_to(PipelineState::Aborted));
    }

    #[test]
    fn test_waves_are_sequential() {
        assert!(PipelineState::IdentityResolved.can_transition_to(PipelineState::Wave(0)));
        assert!(PipelineState::Wave(0).can_transition_to(PipelineState::Wave(1)));
        assert!(!PipelineState::Wave(0).can_transition_to(PipelineState::Wave(2)));
        assert!(!PipelineState::IdentityResolved.can_transition_to(PipelineState::Wave(1)));
    }

    #[test]
    fn test_terminal() {
        assert!(PipelineState::Done.is_terminal());
        assert!(!PipelineState::Expand.is_terminal());
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Errored));
        assert!(PipelineState::Wave(3).can_transition_to(PipelineState::Errored));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(PipelineState::Wave(1)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "wave", "index": 1}));
        let json = serde_json::to_value(PipelineState::Done).unwrap();
        assert_eq!(json, serde_json::json!({"state": "done"}));
    }
}
