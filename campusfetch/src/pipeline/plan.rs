//! Declarative pipeline layout with validation.

use super::expander::DependentTaskExpander;
use super::wave::{Milestone, Wave};
use crate::errors::PlanValidationError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// The dynamic step run after every static wave.
#[derive(Clone)]
pub struct ExpansionStep {
    /// Name of the dynamic wave.
    pub name: String,
    /// Builds the wave's tasks from storage.
    pub expander: Arc<dyn DependentTaskExpander>,
    /// Milestone reported after the dynamic wave settles.
    pub milestone: Option<Milestone>,
}

impl fmt::Debug for ExpansionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionStep")
            .field("name", &self.name)
            .field("milestone", &self.milestone)
            .finish_non_exhaustive()
    }
}

/// A validated sequence of waves plus an optional expansion step.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    name: String,
    waves: Vec<Wave>,
    expansion: Option<ExpansionStep>,
}

impl PipelinePlan {
    /// Plan name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static waves, in run order.
    #[must_use]
    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    /// The expansion step, if any.
    #[must_use]
    pub fn expansion(&self) -> Option<&ExpansionStep> {
        self.expansion.as_ref()
    }

    /// Number of statically known tasks.
    #[must_use]
    pub fn static_task_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    /// Names of every wave, the dynamic one last.
    #[must_use]
    pub fn wave_names(&self) -> Vec<&str> {
        self.waves
            .iter()
            .map(|w| w.name.as_str())
            .chain(self.expansion.iter().map(|e| e.name.as_str()))
            .collect()
    }
}

/// Builder for [`PipelinePlan`].
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    name: String,
    waves: Vec<Wave>,
    expansion: Option<ExpansionStep>,
}

impl PlanBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waves: Vec::new(),
            expansion: None,
        }
    }

    /// Appends a static wave.
    #[must_use]
    pub fn wave(mut self, wave: Wave) -> Self {
        self.waves.push(wave);
        self
    }

    /// Sets the expansion step run after the static waves.
    #[must_use]
    pub fn expansion(
        mut self,
        name: impl Into<String>,
        expander: Arc<dyn DependentTaskExpander>,
        milestone: Option<Milestone>,
    ) -> Self {
        self.expansion = Some(ExpansionStep {
            name: name.into(),
            expander,
            milestone,
        });
        self
    }

    /// Validates and builds the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan has no waves, wave names repeat, or
    /// milestones exceed 100 or decrease.
    pub fn build(self) -> Result<PipelinePlan, PlanValidationError> {
        if self.waves.is_empty() && self.expansion.is_none() {
            return Err(PlanValidationError::new(
                "PLAN-EMPTY",
                format!("Plan '{}' has no waves", self.name),
            ));
        }

        let mut seen = HashSet::new();
        let names = self
            .waves
            .iter()
            .map(|w| w.name.as_str())
            .chain(self.expansion.iter().map(|e| e.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(PlanValidationError::new(
                    "PLAN-DUPLICATE-WAVE",
                    format!("Wave '{name}' appears more than once"),
                )
                .with_waves(vec![name.to_string()]));
            }
        }

        let milestones = self
            .waves
            .iter()
            .filter_map(|w| w.milestone.as_ref().map(|m| (w.name.as_str(), m)))
            .chain(
                self.expansion
                    .iter()
                    .filter_map(|e| e.milestone.as_ref().map(|m| (e.name.as_str(), m))),
            );
        let mut previous: Option<(&str, u8)> = None;
        for (wave, milestone) in milestones {
            if milestone.percent > 100 {
                return Err(PlanValidationError::new(
                    "PLAN-MILESTONE-RANGE",
                    format!("Wave '{wave}' reports {}%", milestone.percent),
                )
                .with_waves(vec![wave.to_string()]));
            }
            if let Some((prev_wave, prev)) = previous {
                if milestone.percent < prev {
                    return Err(PlanValidationError::new(
                        "PLAN-MILESTONE-ORDER",
                        format!(
                            "Wave '{wave}' reports {}% after '{prev_wave}' reported {prev}%",
                            milestone.percent
                        ),
                    )
                    .with_waves(vec![prev_wave.to_string(), wave.to_string()]));
                }
            }
            previous = Some((wave, milestone.percent));
        }

        Ok(PipelinePlan {
            name: self.name,
            waves: self.waves,
            expansion: self.expansion,
        })
    }
}
