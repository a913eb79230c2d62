//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run or plan execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Not started yet
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an unrecovered error
    Failed,
}

/// Lifecycle of a single step within a plan
///
/// `NotStarted -> Going -> Done`. Going back to `NotStarted` only happens
/// through an explicit force, which discards the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    Going,
    Done,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not-started",
            StepStatus::Going => "going",
            StepStatus::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Done)
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID (used by the history store)
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of plans
    pub total_plans: usize,

    /// Number of plans that finished successfully
    pub completed_plans: usize,

    /// Number of failed plans
    pub failed_plans: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_plans: 0,
            completed_plans: 0,
            failed_plans: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_plans: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_plans = total_plans;
    }

    /// Mark run as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark run as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_plans == 0 {
            return 0.0;
        }
        (self.completed_plans + self.failed_plans) as f64 / self.total_plans as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
