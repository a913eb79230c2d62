//! Core domain models
//!
//! Plans, steps and their phase data, test definitions and results, and
//! the error taxonomy shared by every other module.

pub mod config;
pub mod context;
pub mod data;
pub mod definition;
pub mod error;
pub mod names;
pub mod plan;
pub mod result;
pub mod state;
pub mod step;

pub use config::{PlanConfig, PlansConfig};
pub use context::RunContext;
pub use data::{FieldKind, FieldSpec, FieldValue, StepData};
pub use definition::TestDefinition;
pub use error::{Error, ErrorKind, Result};
pub use plan::{Plan, StepOverride};
pub use result::{Outcome, ResultSummary, TestResult};
pub use state::{ExecutionStatus, RunState, StepStatus};
pub use step::{Step, StepKind};
