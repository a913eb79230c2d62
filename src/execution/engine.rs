//! Run engine - schedules the plans of a run and reports their progress

use crate::core::context::RunContext;
use crate::core::error::Result;
use crate::core::plan::Plan;
use crate::core::result::ResultSummary;
use crate::core::state::{ExecutionStatus, RunState};
use crate::core::step::StepKind;
use crate::execution::executor::PlanExecutor;
use crate::execution::scheduler::{PlanScheduler, SchedulingStrategy};
use crate::plugin::Registries;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        id: String,
        workdir: PathBuf,
        plans: usize,
    },
    PlanStarted {
        plan: String,
    },
    StepStarted {
        plan: String,
        step: StepKind,
    },
    /// Done in an earlier invocation with the same configuration
    StepSkipped {
        plan: String,
        step: StepKind,
    },
    StepCompleted {
        plan: String,
        step: StepKind,
    },
    StepFailed {
        plan: String,
        step: StepKind,
        error: String,
    },
    PlanCompleted {
        plan: String,
        summary: ResultSummary,
    },
    PlanFailed {
        plan: String,
        error: String,
    },
    RunCompleted {
        id: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Handlers shared by the engine and every plan executor
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventSink {
    pub fn add(&self, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: RunEvent) {
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event.clone());
        }
    }
}

/// Outcome of one plan
#[derive(Debug)]
pub struct PlanReport {
    pub name: String,
    pub outcome: Result<ResultSummary>,
}

/// Outcome of a whole run
#[derive(Debug)]
pub struct RunReport {
    pub id: String,
    pub workdir: PathBuf,
    pub state: RunState,
    /// In plan order
    pub plans: Vec<PlanReport>,
}

impl RunReport {
    /// Result counts over every successful plan
    pub fn results(&self) -> ResultSummary {
        let mut total = ResultSummary::default();
        for summary in self.plans.iter().filter_map(|p| p.outcome.as_ref().ok()) {
            total.pass += summary.pass;
            total.fail += summary.fail;
            total.error += summary.error;
            total.warn += summary.warn;
            total.skip += summary.skip;
        }
        total
    }

    /// First plan error in plan order, or the overall results
    pub fn into_result(self) -> Result<ResultSummary> {
        let results = self.results();
        for plan in self.plans {
            if let Err(err) = plan.outcome {
                return Err(err);
            }
        }
        Ok(results)
    }
}

/// Main run engine
pub struct RunEngine {
    registries: Arc<Registries>,
    scheduler: PlanScheduler,
    events: EventSink,
}

impl RunEngine {
    pub fn new(registries: Arc<Registries>, strategy: SchedulingStrategy) -> Self {
        Self {
            registries,
            scheduler: PlanScheduler::new(strategy),
            events: EventSink::default(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        self.events.add(Arc::new(handler));
    }

    /// Execute every plan of the run
    ///
    /// A failing plan does not stop its siblings; all of them finish and
    /// are reported.
    pub async fn execute(&self, run: Arc<RunContext>, plans: Vec<Plan>) -> RunReport {
        let mut state = RunState::new();
        state.start(plans.len());
        info!(run = %run.id, plans = plans.len(), strategy = ?self.scheduler.strategy(), "Starting run");
        self.events.emit(RunEvent::RunStarted {
            id: run.id.clone(),
            workdir: run.workdir.clone(),
            plans: plans.len(),
        });

        let names: Vec<String> = plans.iter().map(|p| p.name.clone()).collect();
        let registries = self.registries.clone();
        let events = self.events.clone();
        let outcomes = self
            .scheduler
            .run_all(plans, |mut plan| {
                let executor = PlanExecutor::new(registries.clone(), run.clone(), events.clone());
                let events = events.clone();
                async move {
                    events.emit(RunEvent::PlanStarted {
                        plan: plan.name.clone(),
                    });
                    let outcome = executor.execute(&mut plan).await;
                    match &outcome {
                        Ok(summary) => events.emit(RunEvent::PlanCompleted {
                            plan: plan.name.clone(),
                            summary: summary.clone(),
                        }),
                        Err(err) => events.emit(RunEvent::PlanFailed {
                            plan: plan.name.clone(),
                            error: err.message().to_string(),
                        }),
                    }
                    outcome
                }
            })
            .await;

        let mut reports = Vec::with_capacity(names.len());
        for (name, outcome) in names.into_iter().zip(outcomes) {
            let outcome: Result<ResultSummary> = outcome.and_then(|inner| inner);
            match &outcome {
                Ok(_) => state.completed_plans += 1,
                Err(err) => {
                    error!(plan = %name, "{}", err.message());
                    state.failed_plans += 1;
                }
            }
            reports.push(PlanReport { name, outcome });
        }

        if state.failed_plans > 0 {
            state.fail();
        } else {
            state.complete();
        }
        info!(run = %run.id, status = ?state.status, "Run finished");
        self.events.emit(RunEvent::RunCompleted {
            id: run.id.clone(),
            status: state.status,
        });

        RunReport {
            id: run.id.clone(),
            workdir: run.workdir.clone(),
            state,
            plans: reports,
        }
    }
}
