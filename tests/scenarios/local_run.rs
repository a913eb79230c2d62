//! Test: Local Run - a whole plan against the local machine

use crate::helpers::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use testcraft::core::result::{Outcome, TestResult};
use testcraft::execution::workdir::read_yaml_list;
use testcraft::Registries;

const PLANS: &str = r#"
plans:
  /local:
    environment:
      TARGET: world
    discover:
      how: shell
      tests:
        - name: greet
          test: test "$GREETING $TARGET" = "hello world"
        - name: broken
          test: exit 1
        - name: topology
          test: test -f "$TESTCRAFT_TOPOLOGY_YAML"
    provision:
      how: local
    prepare:
      how: shell
      script: test -f "$TESTCRAFT_TOPOLOGY_BASH"
    report:
      how: junit
"#;

#[tokio::test]
async fn test_local_plan_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Arc::new(Registries::builtin());
    let mut run = run_context(dir.path(), Arc::new(CountingFetcher::default()));
    run.set_variable("GREETING", "hello");
    let plan_workdir = run.plan_workdir("/local");

    let outcome = run_plans(registries.clone(), run.clone(), plans(PLANS, &registries, &run, &BTreeMap::new())).await;
    let summary = outcome.report.into_result().unwrap();
    assert_eq!(summary.pass, 2);
    assert_eq!(summary.fail, 1);
    assert!(!summary.is_success());

    let results: Vec<TestResult> = read_yaml_list(&plan_workdir.join("execute/results.yaml")).unwrap();
    let broken = results.iter().find(|r| r.name == "/broken").unwrap();
    assert_eq!(broken.outcome, Outcome::Fail);

    let junit = std::fs::read_to_string(plan_workdir.join("report/junit.xml")).unwrap();
    assert!(junit.contains("tests=\"3\""));
    assert!(junit.contains("failures=\"1\""));
}
