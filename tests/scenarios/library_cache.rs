//! Test: Library Cache - each remote library is fetched once per run

use crate::helpers::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use testcraft::SchedulingStrategy;

const PLANS: &str = r#"
plans:
  /a:
    discover:
      how: shell
      tests:
        - name: first
          test: ./lib.sh
          require:
            - url: https://example.com/libs.git
        - name: second
          test: ./lib.sh
          require:
            - url: https://example.com/libs.git
              destination: vendor
    provision:
      name: a-box
      how: recording
  /b:
    discover:
      how: shell
      tests:
        - name: third
          test: ./lib.sh
          require:
            - url: https://example.com/libs.git
            - url: https://example.com/other.git
              ref: v1
    provision:
      name: b-box
      how: recording
"#;

#[tokio::test]
async fn test_library_fetched_once_across_plans() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new();
    let fetcher = Arc::new(CountingFetcher::default());
    let (registries, _) = registries(&recorder);
    let run = run_context(dir.path(), fetcher.clone());

    let outcome = run_plans_with(
        registries.clone(),
        run.clone(),
        plans(PLANS, &registries, &run, &BTreeMap::new()),
        SchedulingStrategy::Parallel,
    )
    .await;
    let summary = outcome.report.into_result().unwrap();
    assert_eq!(summary.pass, 3);

    // one fetch per distinct (url, ref)
    assert_eq!(fetcher.calls(), 2);

    let a = run.plan_workdir("/a").join("discover/tests");
    assert!(a.join("first/lib.sh").exists());
    assert!(a.join("second/vendor/lib.sh").exists());
    assert!(run.plan_workdir("/b").join("discover/tests/third/lib.sh").exists());
}
