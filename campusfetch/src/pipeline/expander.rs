//! Dependent task expansion.
//!
//! Some work can only be planned after an earlier wave has written its rows:
//! the bond wave needs the course ids produced by the courses task. An
//! expander reads those rows back and turns each one into follow-up tasks.

use crate::context::IdentityResult;
use crate::errors::TaskError;
use crate::tasks::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A row read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key of the row.
    pub id: i64,
    /// Remaining columns.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Creates a record with no extra fields.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: serde_json::Map::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Returns a string field, if present.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Reads rows written by an earlier wave.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns every row belonging to `identity`.
    async fn records(&self, identity: &IdentityResult) -> Result<Vec<Record>, TaskError>;
}

/// Builds the dynamic wave from storage state.
#[async_trait]
pub trait DependentTaskExpander: Send + Sync {
    /// Returns the follow-up tasks; an empty list means the wave is a no-op.
    async fn expand(&self, identity: &IdentityResult) -> Result<Vec<Arc<dyn Task>>, TaskError>;
}

/// Factory turning one (record, variant) pair into a task.
pub type TaskFactory<V> = Arc<dyn Fn(&Record, &V) -> Arc<dyn Task> + Send + Sync>;

/// Multiplies every record by a fixed list of variants.
///
/// With two variants and three records this produces six tasks, ordered by
/// record first and variant second.
pub struct FixedMultiplicityExpander<V> {
    source: Arc<dyn RecordSource>,
    variants: Vec<V>,
    factory: TaskFactory<V>,
}

impl<V> FixedMultiplicityExpander<V> {
    /// Creates an expander.
    pub fn new<F>(source: Arc<dyn RecordSource>, variants: Vec<V>, factory: F) -> Self
    where
        F: Fn(&Record, &V) -> Arc<dyn Task> + Send + Sync + 'static,
    {
        Self {
            source,
            variants,
            factory: Arc::new(factory),
        }
    }

    /// Number of tasks produced per record.
    #[must_use]
    pub fn multiplicity(&self) -> usize {
        self.variants.len()
    }
}

impl<V: fmt::Debug> fmt::Debug for FixedMultiplicityExpander<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedMultiplicityExpander")
            .field("variants", &self.variants)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<V: Send + Sync> DependentTaskExpander for FixedMultiplicityExpander<V> {
    async fn expand(&self, identity: &IdentityResult) -> Result<Vec<Arc<dyn Task>>, TaskError> {
        let records = self.source.records(identity).await?;
        tracing::debug!(
            records = records.len(),
            variants = self.variants.len(),
            "Expanding dependent tasks"
        );

        let tasks = records
            .iter()
            .flat_map(|record| {
                self.variants
                    .iter()
                    .map(move |variant| (self.factory)(record, variant))
            })
            .collect();
        Ok(tasks)
    }
}
