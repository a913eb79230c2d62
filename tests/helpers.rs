//! Test utility functions for testcraft

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use testcraft::core::data::{FieldSpec, StepData};
use testcraft::core::plan::StepOverride;
use testcraft::execution::{RunEngine, RunEvent, RunReport, SchedulingStrategy};
use testcraft::guest::{CommandOutput, Guest, GuestData, GuestError, ProcessOptions, TransferOptions};
use testcraft::library::{LibraryCache, RemoteFetcher};
use testcraft::plugin::{Method, PhaseContext, ProvisionPlugin, Registries};
use testcraft::{Plan, PlansConfig, Result, RunContext, StepKind};

const RECORDING_FIELDS: &[FieldSpec] = &[FieldSpec::text("role", "Role of the guest.")];

/// Provision method handing out recording guests
pub const RECORDING: Method = Method::new("recording", "Guests which only record what they are asked to do.", 10, RECORDING_FIELDS);

/// Shared log of every guest operation
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<(String, String)>>,
    /// (guest, command substring) which fails
    fail_on: Mutex<Option<(String, String)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, guest: &str, needle: &str) {
        *self.fail_on.lock().unwrap() = Some((guest.to_string(), needle.to_string()));
    }

    fn record(&self, guest: &str, call: String) {
        self.calls.lock().unwrap().push((guest.to_string(), call));
    }

    fn fails(&self, guest: &str, command: &str) -> bool {
        self.fail_on
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|(name, needle)| name == guest && command.contains(needle))
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of a guest containing `needle`
    pub fn count(&self, guest: &str, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(name, call)| name == guest && call.contains(needle))
            .count()
    }

    /// Commands run on a guest containing `needle`
    pub fn runs(&self, guest: &str, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(name, call)| name == guest && call.starts_with("run ") && call.contains(needle))
            .count()
    }
}

/// Guest which records every operation instead of performing it
#[derive(Debug)]
pub struct RecordingGuest {
    data: GuestData,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Guest for RecordingGuest {
    fn data(&self) -> &GuestData {
        &self.data
    }

    async fn start(&self) -> std::result::Result<(), GuestError> {
        self.recorder.record(&self.data.name, "start".to_string());
        Ok(())
    }

    async fn run(&self, command: &str, _options: &ProcessOptions) -> std::result::Result<CommandOutput, GuestError> {
        self.recorder.record(&self.data.name, format!("run {}", command));
        if self.recorder.fails(&self.data.name, command) {
            return Err(GuestError::CommandFailed {
                command: command.to_string(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "boom".to_string(),
            });
        }
        // every recording guest has dnf
        let stdout = if command.starts_with("command -v") {
            "/usr/bin/dnf\n".to_string()
        } else {
            String::new()
        };
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    async fn push(
        &self,
        source: &Path,
        _destination: &Path,
        _options: &TransferOptions,
    ) -> std::result::Result<(), GuestError> {
        self.recorder.record(&self.data.name, format!("push {}", source.display()));
        Ok(())
    }

    async fn pull(&self, source: &Path, _destination: &Path) -> std::result::Result<(), GuestError> {
        self.recorder.record(&self.data.name, format!("pull {}", source.display()));
        Ok(())
    }

    async fn reboot(&self) -> std::result::Result<(), GuestError> {
        self.recorder.record(&self.data.name, "reboot".to_string());
        Ok(())
    }

    async fn stop(&self) -> std::result::Result<(), GuestError> {
        self.recorder.record(&self.data.name, "stop".to_string());
        Ok(())
    }
}

pub struct RecordingProvision {
    recorder: Arc<Recorder>,
    provisioned: AtomicUsize,
}

impl RecordingProvision {
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisionPlugin for RecordingProvision {
    async fn go(&self, _ctx: &PhaseContext, data: &StepData) -> Result<Arc<dyn Guest>> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        self.restore(GuestData {
            name: data.name.clone(),
            how: RECORDING.name.to_string(),
            role: data.text("role").map(str::to_string),
            ..Default::default()
        })
    }

    fn restore(&self, data: GuestData) -> Result<Arc<dyn Guest>> {
        Ok(Arc::new(RecordingGuest {
            data,
            recorder: self.recorder.clone(),
        }))
    }
}

/// Built-in registries plus the recording provision method
pub fn registries(recorder: &Arc<Recorder>) -> (Arc<Registries>, Arc<RecordingProvision>) {
    let provision = Arc::new(RecordingProvision {
        recorder: recorder.clone(),
        provisioned: AtomicUsize::new(0),
    });
    let mut registries = Registries::builtin();
    registries.provision.register(RECORDING, provision.clone());
    (Arc::new(registries), provision)
}

/// Remote fetcher which writes a single file and counts its calls
#[derive(Default)]
pub struct CountingFetcher {
    pub calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, _reference: Option<&str>, destination: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // give concurrent requests a chance to pile up
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        std::fs::create_dir_all(destination)?;
        std::fs::write(destination.join("lib.sh"), "echo lib\n")?;
        Ok(())
    }
}

/// Run context rooted in a temporary directory
pub fn run_context(workdir: &Path, fetcher: Arc<dyn RemoteFetcher>) -> RunContext {
    let libraries = Arc::new(LibraryCache::new(workdir.join("libraries"), fetcher));
    RunContext::new("run-001", workdir.to_path_buf(), libraries)
}

/// Build every enabled plan of a plans file
pub fn plans(
    yaml: &str,
    registries: &Registries,
    run: &RunContext,
    overrides: &BTreeMap<StepKind, StepOverride>,
) -> Vec<Plan> {
    let config = PlansConfig::from_yaml(yaml).unwrap();
    config
        .enabled_plans()
        .map(|(name, plan)| Plan::from_config(name, plan, registries, run.plan_workdir(name), overrides).unwrap())
        .collect()
}

/// Outcome of a run together with every emitted event
pub struct RunOutcome {
    pub report: RunReport,
    pub events: Vec<RunEvent>,
}

impl RunOutcome {
    pub fn skipped_steps(&self, plan: &str) -> Vec<StepKind> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::StepSkipped { plan: p, step } if p == plan => Some(*step),
                _ => None,
            })
            .collect()
    }

    pub fn started_steps(&self, plan: &str) -> Vec<StepKind> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::StepStarted { plan: p, step } if p == plan => Some(*step),
                _ => None,
            })
            .collect()
    }
}

/// Run plans sequentially, collecting the events
pub async fn run_plans(registries: Arc<Registries>, run: RunContext, plans: Vec<Plan>) -> RunOutcome {
    run_plans_with(registries, run, plans, SchedulingStrategy::Sequential).await
}

pub async fn run_plans_with(
    registries: Arc<Registries>,
    run: RunContext,
    plans: Vec<Plan>,
    strategy: SchedulingStrategy,
) -> RunOutcome {
    let engine = RunEngine::new(registries, strategy);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event: RunEvent| sink.lock().unwrap().push(event));
    let report = engine.execute(Arc::new(run), plans).await;
    let events = events.lock().unwrap().clone();
    RunOutcome { report, events }
}

/// Paths of every file below `root`
pub fn files_below(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}
