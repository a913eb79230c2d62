//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::state::ExecutionStatus;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Run id, the name of the run workdir
    pub run_id: String,

    pub workdir: PathBuf,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_plans: usize,
    pub completed_plans: usize,
    pub failed_plans: usize,

    /// Test counts over all plans, e.g. "3 passed, 1 failed"
    pub results: String,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.execution_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&execution_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// Create a summary from a finished run
pub fn create_summary(report: &RunReport) -> RunSummary {
    RunSummary {
        execution_id: report.state.execution_id,
        run_id: report.id.clone(),
        workdir: report.workdir.clone(),
        status: report.state.status,
        started_at: report.state.started_at.unwrap_or_else(Utc::now),
        completed_at: report.state.completed_at,
        total_plans: report.state.total_plans,
        completed_plans: report.state.completed_plans,
        failed_plans: report.state.failed_plans,
        results: report.results().to_string(),
    }
}
