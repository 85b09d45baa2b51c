//! In-memory storage fixtures.
//!
//! [`InMemoryStore`] stands in for the relational store: tasks upsert rows
//! into named tables, and a [`TableSource`] reads a table back for the
//! expander.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::context::{IdentityResult, TaskContext};
use crate::errors::TaskError;
use crate::pipeline::{Record, RecordSource, RetryPolicy};
use crate::tasks::{Task, TaskValue};

/// A concurrent, upsert-only table store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: DashMap<String, DashMap<i64, Record>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row keyed by its id.
    pub fn upsert(&self, table: &str, record: Record) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(record.id, record);
    }

    /// Rows of `table`, ordered by id.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .tables
            .get(table)
            .map(|t| t.iter().map(|r| r.value().clone()).collect())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.len())
    }

    /// Number of rows across every table.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }

    /// Number of upserts performed, repeated writes included.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// A task that upserts fixed rows into a table.
#[derive(Debug)]
pub struct UpsertTask {
    name: String,
    store: Arc<InMemoryStore>,
    table: String,
    rows: Vec<Record>,
}

impl UpsertTask {
    /// Creates a task writing `rows` into `table`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<InMemoryStore>,
        table: impl Into<String>,
        rows: Vec<Record>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            table: table.into(),
            rows,
        }
    }
}

#[async_trait]
impl Task for UpsertTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskValue, TaskError> {
        let entity_id = ctx
            .entity_id()
            .ok_or_else(|| TaskError::storage("no entity id in context"))?;
        for row in &self.rows {
            let row = row.clone().with_field("entity_id", serde_json::json!(entity_id));
            self.store.upsert(&self.table, row);
        }
        Ok(serde_json::json!({ "rows": self.rows.len() }))
    }
}

/// Reads one table of an [`InMemoryStore`], optionally failing first.
#[derive(Debug)]
pub struct TableSource {
    store: Arc<InMemoryStore>,
    table: String,
    failures: AtomicUsize,
    reads: AtomicUsize,
}

impl TableSource {
    /// Creates a source over `table`.
    #[must_use]
    pub fn new(store: Arc<InMemoryStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            failures: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Fails the first `n` reads with a storage error.
    #[must_use]
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of reads attempted.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for TableSource {
    async fn records(&self, identity: &IdentityResult) -> Result<Vec<Record>, TaskError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if read < self.failures.load(Ordering::SeqCst) {
            return Err(TaskError::storage(format!("read of '{}' failed", self.table)));
        }
        let entity = identity.entity_id.map(serde_json::Value::from);
        Ok(self
            .store
            .rows(&self.table)
            .into_iter()
            .filter(|r| entity.is_none() || r.fields.get("entity_id") == entity.as_ref())
            .collect())
    }
}

/// A configuration with every delay removed, for fast tests.
#[must_use]
pub fn instant_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_cooldown_ms(0)
        .with_retry(
            RetryPolicy::new()
                .with_pacing_ms(0)
                .with_base_delay_ms(0)
                .with_rate_limit_delay_ms(0),
        )
}
