//! Step domain model

use crate::core::data::{FieldSpec, StepData};
use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use crate::core::state::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// File holding the persisted step record inside the step workdir
pub const STEP_RECORD_FILENAME: &str = "step.yaml";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Discover,
    Provision,
    Prepare,
    Execute,
    Report,
    Finish,
}

/// Guest actions which may follow a step on the command line
pub const ACTIONS: &[&str] = &["login", "reboot"];

/// Every token which starts a new command line segment
pub const SUBCOMMANDS: &[&str] = &[
    "discover",
    "provision",
    "prepare",
    "execute",
    "report",
    "finish",
    "login",
    "reboot",
    "tests",
    "plans",
];

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Discover,
        StepKind::Provision,
        StepKind::Prepare,
        StepKind::Execute,
        StepKind::Report,
        StepKind::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Discover => "discover",
            StepKind::Provision => "provision",
            StepKind::Prepare => "prepare",
            StepKind::Execute => "execute",
            StepKind::Report => "report",
            StepKind::Finish => "finish",
        }
    }

    /// Error kind raised when a phase of this step fails
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            StepKind::Discover => ErrorKind::Discover,
            StepKind::Provision => ErrorKind::Provision,
            StepKind::Prepare => ErrorKind::Prepare,
            StepKind::Execute => ErrorKind::Execute,
            StepKind::Report => ErrorKind::Report,
            StepKind::Finish => ErrorKind::Finish,
        }
    }

    /// Steps whose phases act on each provisioned guest
    pub fn is_per_guest(&self) -> bool {
        matches!(self, StepKind::Prepare | StepKind::Execute | StepKind::Finish)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StepKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::specification(format!("Unknown step '{}'.", s)))
    }
}

/// One configured phase: resolved data plus the field table of its method
#[derive(Debug, Clone)]
pub struct Phase {
    pub data: StepData,
    pub fields: &'static [FieldSpec],
}

impl Phase {
    pub fn new(data: StepData, fields: &'static [FieldSpec]) -> Self {
        Self { data, fields }
    }

    pub fn serialize(&self) -> Mapping {
        self.data.serialize(self.fields)
    }
}

/// Persisted state of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,

    /// Resolved phase data the step ran with
    #[serde(default)]
    pub data: Vec<Mapping>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single step of a plan
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,

    /// Phases sorted by their order
    pub phases: Vec<Phase>,

    /// Step workdir, `<plan workdir>/<step name>`
    pub workdir: PathBuf,

    /// Runtime status, loaded from the record
    pub status: StepStatus,

    /// Run the step in this invocation (otherwise only its outputs are loaded)
    pub enabled: bool,

    /// Discard any persisted state before running
    pub force: bool,

    /// Do not perform any effectful operation
    pub dry: bool,
}

impl Step {
    pub fn new(kind: StepKind, mut phases: Vec<Phase>, plan_workdir: &Path) -> Self {
        // stable, phases with equal order keep their configured position
        phases.sort_by_key(|p| p.data.order);
        Self {
            kind,
            phases,
            workdir: plan_workdir.join(kind.as_str()),
            status: StepStatus::NotStarted,
            enabled: true,
            force: false,
            dry: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn record_path(&self) -> PathBuf {
        self.workdir.join(STEP_RECORD_FILENAME)
    }

    /// Resolved data of every phase, in storage form
    pub fn serialized_phases(&self) -> Vec<Mapping> {
        self.phases.iter().map(Phase::serialize).collect()
    }

    /// Read the persisted record, if any
    pub fn load_record(&self) -> Result<Option<StepRecord>> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .wrap_err(ErrorKind::General, || format!("Failed to read '{}'.", path.display()))?;
        let record = serde_yaml::from_str(&content)
            .wrap_err(ErrorKind::General, || format!("Corrupted step record '{}'.", path.display()))?;
        Ok(Some(record))
    }

    /// Load the status from the persisted record
    pub fn load(&mut self) -> Result<Option<StepRecord>> {
        let record = self.load_record()?;
        self.status = record.as_ref().map(|r| r.status).unwrap_or_default();
        Ok(record)
    }

    /// Whether a record was produced by exactly the current configuration
    pub fn matches_record(&self, record: &StepRecord) -> bool {
        record.data == self.serialized_phases()
    }

    /// Persist the given status together with the resolved phase data
    pub fn save(&mut self, status: StepStatus) -> Result<()> {
        self.status = status;
        if self.dry {
            return Ok(());
        }

        let record = StepRecord {
            status,
            data: self.serialized_phases(),
            updated_at: Some(Utc::now()),
        };
        std::fs::create_dir_all(&self.workdir).wrap_err(ErrorKind::General, || {
            format!("Failed to create '{}'.", self.workdir.display())
        })?;
        let content = serde_yaml::to_string(&record)?;
        std::fs::write(self.record_path(), content).wrap_err(ErrorKind::General, || {
            format!("Failed to write '{}'.", self.record_path().display())
        })?;
        debug!(step = %self.kind, status = status.as_str(), "Step record saved");
        Ok(())
    }

    /// Drop all persisted state of the step
    pub fn reset(&mut self) -> Result<()> {
        self.status = StepStatus::NotStarted;
        if self.dry || !self.workdir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&self.workdir).wrap_err(ErrorKind::General, || {
            format!("Failed to clean '{}'.", self.workdir.display())
        })?;
        debug!(step = %self.kind, "Step workdir removed");
        Ok(())
    }
}
