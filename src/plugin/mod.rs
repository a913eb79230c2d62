//! Phase plugins
//!
//! Each step kind has its own plugin trait. Implementations register
//! themselves into a [`Registry`] under one or more [`Method`]s; the step
//! picks the method by the configured `how`.

pub mod hints;
pub mod registry;

pub use registry::{Registries, Registry};

use crate::core::context::RunContext;
use crate::core::data::{FieldSpec, StepData};
use crate::core::definition::TestDefinition;
use crate::core::error::Result;
use crate::core::result::TestResult;
use crate::core::step::StepKind;
use crate::guest::{Guest, GuestData, GuestHandle};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A named implementation of a step
#[derive(Debug, Clone, Copy)]
pub struct Method {
    pub name: &'static str,
    pub doc: &'static str,
    /// Priority, lower comes first in dispatch and listings
    pub order: i64,
    pub fields: &'static [FieldSpec],
}

impl Method {
    pub const fn new(name: &'static str, doc: &'static str, order: i64, fields: &'static [FieldSpec]) -> Self {
        Self { name, doc, order, fields }
    }
}

/// Everything a phase gets to see while running
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub run: Arc<RunContext>,
    /// Step the phase belongs to
    pub step: StepKind,
    pub plan_name: String,
    pub plan_workdir: PathBuf,
    pub step_workdir: PathBuf,
    /// Run, plan and command line environment merged
    pub environment: BTreeMap<String, String>,
    /// Every guest of the plan, empty before provision
    pub guests: Vec<GuestHandle>,
    pub dry: bool,
}

impl PhaseContext {
    /// Workdir of another step of the same plan
    pub fn step_dir(&self, step: StepKind) -> PathBuf {
        self.plan_workdir.join(step.as_str())
    }
}

#[async_trait]
pub trait DiscoverPlugin: Send + Sync {
    async fn go(&self, ctx: &PhaseContext, data: &StepData) -> Result<Vec<TestDefinition>>;
}

#[async_trait]
pub trait ProvisionPlugin: Send + Sync {
    /// Create the guest described by the phase data
    async fn go(&self, ctx: &PhaseContext, data: &StepData) -> Result<Arc<dyn Guest>>;

    /// Recreate a guest from its persisted data
    fn restore(&self, data: GuestData) -> Result<Arc<dyn Guest>>;
}

#[async_trait]
pub trait PreparePlugin: Send + Sync {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()>;
}

#[async_trait]
pub trait ExecutePlugin: Send + Sync {
    async fn go(
        &self,
        ctx: &PhaseContext,
        data: &StepData,
        guest: &GuestHandle,
        tests: &[TestDefinition],
    ) -> Result<Vec<TestResult>>;
}

#[async_trait]
pub trait ReportPlugin: Send + Sync {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, results: &[TestResult]) -> Result<()>;
}

#[async_trait]
pub trait FinishPlugin: Send + Sync {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()>;
}
