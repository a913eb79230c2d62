//! Test: Guest Failure - per-guest failures are aggregated, siblings finish

use crate::helpers::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use testcraft::core::state::{ExecutionStatus, StepStatus};
use testcraft::{ErrorKind, StepKind};

const TWO_GUESTS: &str = r#"
plans:
  /multi:
    provision:
      - name: one
        how: recording
      - name: two
        how: recording
        role: server
    prepare:
      - name: setup
        how: shell
        script: echo setup
      - name: server-only
        how: shell
        where: server
        script: echo server
"#;

#[tokio::test]
async fn test_failure_on_one_guest_fails_step() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    recorder.fail_on("two", "testcraft-prepare-wrapper.sh@setup");
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));
    let plan_workdir = run.plan_workdir("/multi");

    let outcome = run_plans(registries.clone(), run.clone(), plans(TWO_GUESTS, &registries, &run, &BTreeMap::new())).await;
    assert!(!outcome.started_steps("/multi").contains(&StepKind::Execute));
    assert_eq!(outcome.report.state.status, ExecutionStatus::Failed);

    let err = outcome.report.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Prepare);
    assert_eq!(err.message(), "prepare phase 'setup' failed on guest two.");
    assert_eq!(err.causes().len(), 1);
    assert_eq!(err.causes()[0].kind(), ErrorKind::Prepare);
    assert_eq!(err.causes()[0].causes()[0].kind(), ErrorKind::Run);

    // the healthy guest still ran its phase
    assert_eq!(recorder.runs("one", "testcraft-prepare-wrapper.sh@setup"), 1);
    // the failed step stays going so the next invocation retries it
    let record = std::fs::read_to_string(plan_workdir.join("prepare/step.yaml")).unwrap();
    assert!(record.contains("status: going"));
    let provision = std::fs::read_to_string(plan_workdir.join("provision/step.yaml")).unwrap();
    assert!(provision.contains(&format!("status: {}", StepStatus::Done.as_str())));
}

#[tokio::test]
async fn test_where_limits_guests() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    let outcome = run_plans(registries.clone(), run.clone(), plans(TWO_GUESTS, &registries, &run, &BTreeMap::new())).await;
    outcome.report.into_result().unwrap();

    assert_eq!(recorder.runs("one", "testcraft-prepare-wrapper.sh@server-only"), 0);
    assert_eq!(recorder.runs("two", "testcraft-prepare-wrapper.sh@server-only"), 1);
    assert_eq!(recorder.runs("one", "testcraft-prepare-wrapper.sh@setup"), 1);
    assert_eq!(recorder.runs("two", "testcraft-prepare-wrapper.sh@setup"), 1);
}

#[tokio::test]
async fn test_failing_plan_does_not_stop_siblings() {
    let yaml = r#"
plans:
  /bad:
    provision:
      name: bad-box
      how: recording
    prepare:
      name: setup
      how: shell
      script: "false"
  /good:
    provision:
      name: good-box
      how: recording
    discover:
      how: shell
      tests:
        - name: ok
          test: "true"
"#;
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    recorder.fail_on("bad-box", "testcraft-prepare-wrapper");
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));

    let outcome = run_plans(registries.clone(), run.clone(), plans(yaml, &registries, &run, &BTreeMap::new())).await;
    let report = outcome.report;
    assert_eq!(report.state.completed_plans, 1);
    assert_eq!(report.state.failed_plans, 1);
    assert_eq!(report.plans[0].name, "/bad");
    assert!(report.plans[0].outcome.is_err());
    assert_eq!(report.plans[1].outcome.as_ref().unwrap().pass, 1);
    assert_eq!(recorder.runs("good-box", "true"), 1);
}
