//! Test: Dry Run - nothing touches guests or the workdir

use crate::helpers::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use testcraft::core::plan::StepOverride;
use testcraft::StepKind;

const PLANS: &str = r#"
plans:
  /smoke:
    discover:
      how: shell
      tests:
        - name: hello
          test: echo hello
          require:
            - url: https://example.com/libs.git
    provision:
      - name: one
        how: recording
      - name: two
        how: recording
    prepare:
      how: install
      package: [make, gcc]
    report:
      how: junit
    finish:
      how: shell
      script: echo bye
"#;

#[tokio::test]
async fn test_dry_run_has_no_effects() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let fetcher = Arc::new(CountingFetcher::default());
    let (registries, _) = registries(&recorder);
    let mut run = run_context(dir.path(), fetcher.clone());
    run.dry = true;

    let outcome = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new())).await;
    assert_eq!(outcome.started_steps("/smoke"), StepKind::ALL.to_vec());
    let summary = outcome.report.into_result().unwrap();
    assert_eq!(summary.total(), 0);

    assert!(recorder.calls().is_empty(), "{:?}", recorder.calls());
    assert_eq!(fetcher.calls(), 0);
    assert!(files_below(dir.path()).is_empty(), "{:?}", files_below(dir.path()));
}

#[tokio::test]
async fn test_dry_step_only() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), Arc::new(CountingFetcher::default()));
    let overrides = BTreeMap::from([(
        StepKind::Finish,
        StepOverride {
            dry: true,
            ..Default::default()
        },
    )]);

    let outcome = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &overrides)).await;
    outcome.report.into_result().unwrap();

    assert_eq!(recorder.runs("one", "dnf install -y make gcc"), 1);
    // the dry finish neither ran its script nor stopped the guests
    assert_eq!(recorder.runs("one", "testcraft-finish-wrapper"), 0);
    assert_eq!(recorder.count("one", "stop"), 0);
    assert!(!run.plan_workdir("/smoke").join("finish/step.yaml").exists());
    assert!(run.plan_workdir("/smoke").join("report/junit.xml").exists());
}
