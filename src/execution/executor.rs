//! Plan executor - drives the steps of one plan through their states

use crate::core::context::RunContext;
use crate::core::data::StepData;
use crate::core::definition::{TestDefinition, TESTS_FILENAME};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::plan::Plan;
use crate::core::result::{ResultSummary, TestResult, RESULTS_FILENAME};
use crate::core::state::StepStatus;
use crate::core::step::{Step, StepKind};
use crate::execution::engine::{EventSink, RunEvent};
use crate::execution::workdir::{read_yaml_list, write_yaml};
use crate::guest::{GuestData, GuestHandle, GUESTS_FILENAME};
use crate::plugin::{PhaseContext, Registries, Registry};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outputs handed from one step to the next
#[derive(Debug, Default)]
pub struct PlanOutputs {
    pub tests: Vec<TestDefinition>,
    pub guests: Vec<GuestHandle>,
    pub results: Vec<TestResult>,
}

/// Runs the steps of a plan in order
pub struct PlanExecutor {
    registries: Arc<Registries>,
    run: Arc<RunContext>,
    events: EventSink,
}

impl PlanExecutor {
    pub fn new(registries: Arc<Registries>, run: Arc<RunContext>, events: EventSink) -> Self {
        Self {
            registries,
            run,
            events,
        }
    }

    /// Run every step of the plan, stopping at the first failing one
    pub async fn execute(&self, plan: &mut Plan) -> Result<ResultSummary> {
        let mut outputs = PlanOutputs::default();
        for kind in StepKind::ALL {
            self.go_step(plan, kind, &mut outputs).await?;
        }
        Ok(ResultSummary::from_results(&outputs.results))
    }

    async fn go_step(&self, plan: &mut Plan, kind: StepKind, outputs: &mut PlanOutputs) -> Result<()> {
        let plan_name = plan.name.clone();
        let mut environment = self.run.environment.clone();
        environment.extend(plan.environment.clone());
        let plan_workdir = plan.workdir.clone();

        let step = plan.step_mut(kind);
        step.dry |= self.run.dry;

        if step.enabled && step.force {
            info!(plan = %plan_name, step = %kind, "Forced, discarding previous state");
            if kind == StepKind::Provision {
                self.discard_guests(step).await?;
            }
            step.reset()?;
        }
        let record = step.load()?;

        if !step.enabled {
            if step.status.is_done() {
                debug!(plan = %plan_name, step = %kind, "Step not selected, loading its outputs");
                self.load_outputs(step, outputs)?;
            }
            return Ok(());
        }

        if step.status.is_done() && record.as_ref().is_some_and(|r| step.matches_record(r)) {
            info!(plan = %plan_name, step = %kind, "Step already done");
            self.events.emit(RunEvent::StepSkipped {
                plan: plan_name.clone(),
                step: kind,
            });
            return self.load_outputs(step, outputs);
        }
        if step.status.is_done() {
            info!(plan = %plan_name, step = %kind, "Configuration changed, running again");
        }

        self.events.emit(RunEvent::StepStarted {
            plan: plan_name.clone(),
            step: kind,
        });
        step.save(StepStatus::Going)?;

        let ctx = PhaseContext {
            run: self.run.clone(),
            step: kind,
            plan_name: plan_name.clone(),
            plan_workdir,
            step_workdir: step.workdir.clone(),
            environment,
            guests: outputs.guests.iter().map(|g| g.with_dry(step.dry)).collect(),
            dry: step.dry,
        };

        let result = self.run_phases(step, &ctx, outputs).await;
        match result {
            Ok(()) => {
                self.save_outputs(step, outputs)?;
                step.save(StepStatus::Done)?;
                self.events.emit(RunEvent::StepCompleted {
                    plan: plan_name,
                    step: kind,
                });
                Ok(())
            }
            Err(err) => {
                // the record stays `going` so the next invocation retries the step
                self.events.emit(RunEvent::StepFailed {
                    plan: plan_name,
                    step: kind,
                    error: err.message().to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_phases(&self, step: &Step, ctx: &PhaseContext, outputs: &mut PlanOutputs) -> Result<()> {
        let registries = &self.registries;
        match step.kind {
            StepKind::Discover => {
                outputs.tests.clear();
                for phase in &step.phases {
                    let plugin = lookup(&registries.discover, &phase.data)?;
                    outputs.tests.extend(plugin.go(ctx, &phase.data).await?);
                }
            }
            StepKind::Provision => {
                outputs.guests.clear();
                for phase in &step.phases {
                    let plugin = lookup(&registries.provision, &phase.data)?;
                    let guest = GuestHandle::new(plugin.go(ctx, &phase.data).await?, step.dry);
                    guest.start().await?;
                    info!(plan = %ctx.plan_name, guest = %guest.name(), how = %guest.data().how, "Guest ready");
                    outputs.guests.push(guest);
                }
            }
            StepKind::Prepare => {
                for phase in &step.phases {
                    let plugin = lookup(&registries.prepare, &phase.data)?;
                    let plugin = plugin.clone();
                    per_guest(step.kind, ctx, &phase.data, |ctx, data, guest| {
                        let plugin = plugin.clone();
                        async move { plugin.go(&ctx, &data, &guest).await }
                    })
                    .await?;
                }
            }
            StepKind::Execute => {
                outputs.results.clear();
                for phase in &step.phases {
                    let plugin = lookup(&registries.execute, &phase.data)?;
                    let plugin = plugin.clone();
                    let tests = Arc::new(outputs.tests.clone());
                    let per_guest_results = per_guest(step.kind, ctx, &phase.data, |ctx, data, guest| {
                        let plugin = plugin.clone();
                        let tests = tests.clone();
                        async move { plugin.go(&ctx, &data, &guest, &tests).await }
                    })
                    .await?;
                    outputs.results.extend(per_guest_results.into_iter().flatten());
                }
            }
            StepKind::Report => {
                for phase in &step.phases {
                    let plugin = lookup(&registries.report, &phase.data)?;
                    plugin.go(ctx, &phase.data, &outputs.results).await?;
                }
            }
            StepKind::Finish => {
                for phase in &step.phases {
                    let plugin = lookup(&registries.finish, &phase.data)?;
                    let plugin = plugin.clone();
                    per_guest(step.kind, ctx, &phase.data, |ctx, data, guest| {
                        let plugin = plugin.clone();
                        async move { plugin.go(&ctx, &data, &guest).await }
                    })
                    .await?;
                }
                for guest in &ctx.guests {
                    guest.stop_and_remove().await?;
                }
            }
        }
        Ok(())
    }

    /// Stop and remove the guests recorded by an earlier provision
    async fn discard_guests(&self, step: &Step) -> Result<()> {
        let mut previous = PlanOutputs::default();
        self.load_outputs(step, &mut previous)?;
        for guest in &previous.guests {
            info!(guest = %guest.name(), "Removing previously provisioned guest");
            guest.stop_and_remove().await.map_err(|e| {
                e.wrap(
                    ErrorKind::Provision,
                    format!("Failed to discard guest '{}' before provisioning again.", guest.name()),
                )
            })?;
        }
        Ok(())
    }

    fn save_outputs(&self, step: &Step, outputs: &PlanOutputs) -> Result<()> {
        if step.dry {
            return Ok(());
        }
        match step.kind {
            StepKind::Discover => write_yaml(&step.workdir.join(TESTS_FILENAME), &outputs.tests),
            StepKind::Provision => {
                let guests: Vec<GuestData> = outputs.guests.iter().map(GuestHandle::snapshot).collect();
                write_yaml(&step.workdir.join(GUESTS_FILENAME), &guests)
            }
            StepKind::Execute => write_yaml(&step.workdir.join(RESULTS_FILENAME), &outputs.results),
            StepKind::Prepare | StepKind::Report | StepKind::Finish => Ok(()),
        }
    }

    fn load_outputs(&self, step: &Step, outputs: &mut PlanOutputs) -> Result<()> {
        match step.kind {
            StepKind::Discover => {
                outputs.tests = read_yaml_list(&step.workdir.join(TESTS_FILENAME))?;
            }
            StepKind::Provision => {
                let guests: Vec<GuestData> = read_yaml_list(&step.workdir.join(GUESTS_FILENAME))?;
                outputs.guests = guests
                    .into_iter()
                    .map(|data| {
                        let (_, plugin) = self.registries.provision.get(&data.how).ok_or_else(|| {
                            Error::specification(format!(
                                "Guest '{}' was provisioned by unknown method '{}'.",
                                data.name, data.how
                            ))
                        })?;
                        Ok(GuestHandle::new(plugin.restore(data)?, step.dry))
                    })
                    .collect::<Result<_>>()?;
            }
            StepKind::Execute => {
                outputs.results = read_yaml_list(&step.workdir.join(RESULTS_FILENAME))?;
            }
            StepKind::Prepare | StepKind::Report | StepKind::Finish => {}
        }
        Ok(())
    }
}

/// Plugin of the method a phase was resolved to
fn lookup<'a, P: ?Sized>(registry: &'a Registry<P>, data: &StepData) -> Result<&'a Arc<P>> {
    registry.get(&data.how).map(|(_, plugin)| plugin).ok_or_else(|| {
        Error::specification(format!("Unsupported {} method '{}'.", registry.step(), data.how))
    })
}

/// Run a phase on every guest it applies to, each in its own task
///
/// Every guest runs to completion; failures are collected into one error
/// of the step's kind. Values come back in guest order.
pub async fn per_guest<T, F, Fut>(
    kind: StepKind,
    ctx: &PhaseContext,
    data: &StepData,
    task: F,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(PhaseContext, StepData, GuestHandle) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let guests: Vec<GuestHandle> = ctx
        .guests
        .iter()
        .filter(|g| data.applies_to(g.name(), g.role()))
        .cloned()
        .collect();
    if guests.is_empty() {
        warn!(phase = %data.name, step = %kind, "No guest to run the phase on");
        return Ok(Vec::new());
    }

    let mut set = JoinSet::new();
    for (index, guest) in guests.iter().enumerate() {
        let future = task(ctx.clone(), data.clone(), guest.clone());
        set.spawn(async move { (index, future.await) });
    }

    let mut slots: BTreeMap<usize, Result<T>> = BTreeMap::new();
    let mut crashed = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                slots.insert(index, result);
            }
            Err(join_error) => crashed.push(Error::general("Guest worker crashed.").with_source(join_error)),
        }
    }

    let mut values = Vec::with_capacity(guests.len());
    let mut failures = Vec::new();
    let mut failed_guests = Vec::new();
    for (index, result) in slots {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                let name = guests[index].name().to_string();
                warn!(phase = %data.name, guest = %name, "{}", err.message());
                failed_guests.push(name);
                failures.push(err);
            }
        }
    }
    failures.extend(crashed);

    if failures.is_empty() {
        return Ok(values);
    }
    let message = if failed_guests.is_empty() {
        format!("{} phase '{}' failed.", kind, data.name)
    } else {
        format!(
            "{} phase '{}' failed on guest{} {}.",
            kind,
            data.name,
            if failed_guests.len() == 1 { "" } else { "s" },
            failed_guests.join(", ")
        )
    };
    Err(Error::new(kind.error_kind(), message).with_causes(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::{context, local_guest};

    fn phase_data(where_: &[&str]) -> StepData {
        let mut data = StepData::defaults("setup", "shell", &[]);
        data.where_ = where_.iter().map(|s| s.to_string()).collect();
        data
    }

    #[tokio::test]
    async fn test_per_guest_aggregates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), false);
        ctx.guests = vec![local_guest("one", false), local_guest("two", false)];

        let err = per_guest(StepKind::Prepare, &ctx, &phase_data(&[]), |_, _, guest| async move {
            if guest.name() == "one" {
                Err(Error::prepare("broken"))
            } else {
                Ok(guest.name().to_string())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Prepare);
        assert_eq!(err.message(), "prepare phase 'setup' failed on guest one.");
        assert_eq!(err.causes().len(), 1);
    }

    #[tokio::test]
    async fn test_per_guest_keeps_guest_order_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), false);
        ctx.guests = vec![
            local_guest("a", false),
            local_guest("b", false),
            local_guest("c", false),
        ];

        let names = per_guest(StepKind::Execute, &ctx, &phase_data(&["a", "c"]), |_, _, guest| async move {
            Ok(guest.name().to_string())
        })
        .await
        .unwrap();
        assert_eq!(names, vec!["a", "c"]);
    }
}
