//! Collection topics and the standard plan layout.
//!
//! The identity lookup covers basic details. Everything else is collected in
//! two static waves, followed by a bond wave with one task per course and
//! quota category.

use crate::errors::{CampusfetchError, PlanValidationError};
use crate::pipeline::{
    FixedMultiplicityExpander, Milestone, PipelinePlan, PlanBuilder, Record, RecordSource, Wave,
};
use crate::tasks::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A topic the model is prompted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Name, location and storage identity.
    BasicDetails,
    /// Governing and affiliating bodies.
    Authorities,
    /// Courses offered.
    Courses,
    /// Admission quotas.
    Quotas,
    /// Admission cutoffs.
    Cutoffs,
    /// Fee structure.
    Fees,
    /// Seat matrix.
    Seats,
    /// Service bonds, per course and quota.
    Bonds,
    /// Rankings.
    Rankings,
    /// Admission schedule.
    Schedule,
}

impl Topic {
    /// Every topic.
    pub const ALL: [Self; 10] = [
        Self::BasicDetails,
        Self::Authorities,
        Self::Courses,
        Self::Quotas,
        Self::Cutoffs,
        Self::Fees,
        Self::Seats,
        Self::Bonds,
        Self::Rankings,
        Self::Schedule,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicDetails => "basic_details",
            Self::Authorities => "authorities",
            Self::Courses => "courses",
            Self::Quotas => "quotas",
            Self::Cutoffs => "cutoffs",
            Self::Fees => "fees",
            Self::Seats => "seats",
            Self::Bonds => "bonds",
            Self::Rankings => "rankings",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = CampusfetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CampusfetchError::Config(format!("unknown topic '{s}'")))
    }
}

/// Quota categories each course's bond is collected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaCategory {
    /// Seats filled through national counselling.
    AllIndia,
    /// Seats reserved for the home state.
    State,
}

impl QuotaCategory {
    /// Every category, in fan-out order.
    pub const ALL: [Self; 2] = [Self::AllIndia, Self::State];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllIndia => "all_india",
            Self::State => "state",
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topics of the first static wave.
pub const WAVE_ONE: [Topic; 4] = [
    Topic::Authorities,
    Topic::Courses,
    Topic::Rankings,
    Topic::Schedule,
];

/// Topics of the second static wave; they depend on the courses of wave one.
pub const WAVE_TWO: [Topic; 4] = [Topic::Quotas, Topic::Seats, Topic::Fees, Topic::Cutoffs];

/// Builds a bond task for one course and quota category.
pub type BondTaskFactory = Arc<dyn Fn(&Record, QuotaCategory) -> Arc<dyn Task> + Send + Sync>;

/// Collaborator tasks keyed by topic.
#[derive(Default, Clone)]
pub struct TopicRegistry {
    tasks: HashMap<Topic, Arc<dyn Task>>,
    bonds: Option<BondTaskFactory>,
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<_> = self.tasks.keys().collect();
        topics.sort();
        f.debug_struct("TopicRegistry")
            .field("topics", &topics)
            .field("bonds", &self.bonds.is_some())
            .finish()
    }
}

impl TopicRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the task collecting `topic`.
    #[must_use]
    pub fn register(mut self, topic: Topic, task: Arc<dyn Task>) -> Self {
        self.tasks.insert(topic, task);
        self
    }

    /// Registers the bond task factory.
    #[must_use]
    pub fn with_bonds<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Record, QuotaCategory) -> Arc<dyn Task> + Send + Sync + 'static,
    {
        self.bonds = Some(Arc::new(factory));
        self
    }

    /// The task registered for `topic`.
    #[must_use]
    pub fn get(&self, topic: Topic) -> Option<&Arc<dyn Task>> {
        self.tasks.get(&topic)
    }

    fn wave(&self, name: &str, topics: &[Topic]) -> Result<Wave, PlanValidationError> {
        let tasks = topics
            .iter()
            .map(|topic| {
                self.get(*topic).cloned().ok_or_else(|| {
                    PlanValidationError::new(
                        "PLAN-MISSING-TOPIC",
                        format!("No task registered for topic '{topic}'"),
                    )
                    .with_waves(vec![name.to_string()])
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Wave::new(name).with_tasks(tasks))
    }
}

/// Builds the standard three-wave collection plan.
///
/// # Errors
///
/// Returns an error if a topic of the static waves or the bond factory is
/// missing from `registry`.
pub fn standard_plan(
    registry: &TopicRegistry,
    courses: Arc<dyn RecordSource>,
) -> Result<PipelinePlan, CampusfetchError> {
    let bonds = registry.bonds.clone().ok_or_else(|| {
        PlanValidationError::new("PLAN-MISSING-TOPIC", "No bond task factory registered")
            .with_waves(vec![Topic::Bonds.to_string()])
    })?;

    let wave_one = registry
        .wave("courses_and_rankings", &WAVE_ONE)?
        .with_milestone(30, "Courses and rankings collected");
    let wave_two = registry
        .wave("admissions", &WAVE_TWO)?
        .with_milestone(60, "Quotas, seats, fees and cutoffs collected");

    let expander = FixedMultiplicityExpander::new(
        courses,
        QuotaCategory::ALL.to_vec(),
        move |course: &Record, quota: &QuotaCategory| bonds(course, *quota),
    );

    let plan = PlanBuilder::new("standard")
        .wave(wave_one)
        .wave(wave_two)
        .expansion(
            Topic::Bonds.as_str(),
            Arc::new(expander),
            Some(Milestone::new(90, "Bonds collected")),
        )
        .build()?;
    Ok(plan)
}
