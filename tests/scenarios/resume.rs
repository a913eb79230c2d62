//! Test: Resume - done steps are skipped until forced or changed

use crate::helpers::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use testcraft::core::plan::StepOverride;
use testcraft::core::state::StepStatus;
use testcraft::StepKind;

const PLANS: &str = r#"
plans:
  /smoke:
    discover:
      how: shell
      tests:
        - name: hello
          test: echo hello
    provision:
      name: box
      how: recording
    prepare:
      name: setup
      how: shell
      script: echo prepared
"#;

const WRAPPER: &str = "testcraft-prepare-wrapper.sh";

#[tokio::test]
async fn test_second_invocation_skips_done_steps() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, provision) = registries(&recorder);

    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));
    let first = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new())).await;
    assert_eq!(first.started_steps("/smoke"), StepKind::ALL.to_vec());
    let summary = first.report.into_result().unwrap();
    assert_eq!(summary.pass, 1);
    assert_eq!(recorder.runs("box", WRAPPER), 1);
    assert_eq!(recorder.runs("box", "echo hello"), 1);

    let calls = recorder.calls().len();
    let second = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new())).await;
    assert_eq!(second.skipped_steps("/smoke"), StepKind::ALL.to_vec());
    assert!(second.started_steps("/smoke").is_empty());
    assert_eq!(recorder.calls().len(), calls);
    assert_eq!(provision.provisioned(), 1);

    // results come back from the persisted execute step
    assert_eq!(second.report.into_result().unwrap().pass, 1);
}

#[tokio::test]
async fn test_force_runs_step_again() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, provision) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new()))
        .await
        .report
        .into_result()
        .unwrap();

    let overrides = BTreeMap::from([(
        StepKind::Prepare,
        StepOverride {
            force: true,
            ..Default::default()
        },
    )]);
    let forced = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &overrides)).await;
    assert_eq!(forced.started_steps("/smoke"), vec![StepKind::Prepare]);
    assert!(forced.report.into_result().is_ok());
    assert_eq!(recorder.runs("box", WRAPPER), 2);
    // the guest was restored, not provisioned again
    assert_eq!(provision.provisioned(), 1);
}

#[tokio::test]
async fn test_forced_provision_discards_previous_guests() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, provision) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    let mut first = plans(PLANS, &registries, &run, &BTreeMap::new());
    first[0].step_mut(StepKind::Finish).enabled = false;
    run_plans(registries.clone(), run.clone(), first).await.report.into_result().unwrap();
    let stops = |calls: &[(String, String)]| calls.iter().filter(|(_, call)| call == "stop").count();
    assert_eq!(stops(&recorder.calls()), 0);

    let overrides = BTreeMap::from([(
        StepKind::Provision,
        StepOverride {
            force: true,
            ..Default::default()
        },
    )]);
    let mut forced = plans(PLANS, &registries, &run, &overrides);
    forced[0].step_mut(StepKind::Finish).enabled = false;
    let outcome = run_plans(registries.clone(), run.clone(), forced).await;
    assert!(outcome.report.into_result().is_ok());
    assert_eq!(provision.provisioned(), 2);

    // the old guest went away before the new one started
    let calls = recorder.calls();
    let stop = calls.iter().position(|(_, call)| call == "stop").unwrap();
    let second_start = calls.iter().rposition(|(_, call)| call == "start").unwrap();
    assert_eq!(stops(&calls), 1);
    assert!(stop < second_start);
}

#[tokio::test]
async fn test_changed_configuration_runs_step_again() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new()))
        .await
        .report
        .into_result()
        .unwrap();

    let changed = PLANS.replace("echo prepared", "echo prepared again");
    let outcome = run_plans(registries.clone(), run.clone(), plans(&changed, &registries, &run, &BTreeMap::new())).await;
    assert!(outcome.started_steps("/smoke").contains(&StepKind::Prepare));
    assert!(outcome.skipped_steps("/smoke").contains(&StepKind::Discover));

    let mut plan = plans(&changed, &registries, &run, &BTreeMap::new()).remove(0);
    let prepare = plan.step_mut(StepKind::Prepare);
    prepare.load().unwrap();
    assert_eq!(prepare.status, StepStatus::Done);
}

#[tokio::test]
async fn test_unselected_steps_only_load_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new()))
        .await
        .report
        .into_result()
        .unwrap();

    let mut selected = plans(PLANS, &registries, &run, &BTreeMap::new());
    for step in selected[0].steps.iter_mut() {
        step.enabled = step.kind == StepKind::Execute;
        step.force = step.kind == StepKind::Execute;
    }
    let outcome = run_plans(registries.clone(), run.clone(), selected).await;
    assert_eq!(outcome.started_steps("/smoke"), vec![StepKind::Execute]);
    assert_eq!(outcome.report.into_result().unwrap().pass, 1);
    assert_eq!(recorder.runs("box", "echo hello"), 2);
}
