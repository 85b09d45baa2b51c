//! The immutable subject of one collection run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the institution a pipeline run collects data for.
///
/// Created once per run and shared read-only with every task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// Institution name as supplied by the caller.
    pub name: String,
    /// Region (state, province) the institution belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Academic year the data is collected for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl CollectionRequest {
    /// Creates a request for an institution name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            year: None,
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the year.
    #[must_use]
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Returns a stable string form used for idempotency keys and logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name.trim().to_lowercase(),
            self.region.as_deref().unwrap_or("").trim().to_lowercase(),
            self.year.map(|y| y.to_string()).unwrap_or_default()
        )
    }
}

impl fmt::Display for CollectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref region) = self.region {
            write!(f, " ({region})")?;
        }
        if let Some(year) = self.year {
            write!(f, " [{year}]")?;
        }
        Ok(())
    }
}
