//! Execute phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::definition::TestDefinition;
use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use crate::core::result::{parse_timeout, Outcome, TestResult};
use crate::core::step::StepKind;
use crate::guest::error::GuestError;
use crate::guest::{CommandOutput, GuestHandle, TransferOptions};
use crate::plugin::{ExecutePlugin, Method, PhaseContext};
use crate::plugins::script::guest_environment;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const TEST_NAME_ENV: &str = "TESTCRAFT_TEST_NAME";
pub const TEST_DATA_ENV: &str = "TESTCRAFT_TEST_DATA";

/// Primary log of every test, inside its data directory
pub const OUTPUT_FILENAME: &str = "output.txt";

const INTERNAL_FIELDS: &[FieldSpec] = &[FieldSpec::flag(
    "exit-first",
    "Stop execution after the first test failure or error.",
)
.with_short('x')];

pub const INTERNAL: Method = Method::new(
    "internal",
    "Run each discovered test as a shell command on the guest.",
    50,
    INTERNAL_FIELDS,
);

/// Data directory of a test relative to the execute workdir
pub fn test_data_path(guest: &GuestHandle, test: &TestDefinition) -> PathBuf {
    Path::new("data").join(guest.safe_name()).join(test.safe_name())
}

pub struct InternalExecute;

impl InternalExecute {
    async fn run_test(
        ctx: &PhaseContext,
        data: &StepData,
        guest: &GuestHandle,
        test: &TestDefinition,
    ) -> Result<TestResult> {
        let relative = test_data_path(guest, test);
        let data_dir = ctx.step_workdir.join(&relative);
        std::fs::create_dir_all(&data_dir)
            .wrap_err(ErrorKind::Execute, || format!("Failed to create '{}'.", data_dir.display()))?;
        guest.push(&data_dir, None, &TransferOptions::default()).await?;

        let mut env = guest_environment(ctx, data, guest).await?;
        env.extend(test.environment.clone());
        env.insert(TEST_NAME_ENV.to_string(), test.name.clone());
        env.insert(TEST_DATA_ENV.to_string(), data_dir.to_string_lossy().into_owned());

        let cwd = match &test.path {
            Some(path) => ctx.step_dir(StepKind::Discover).join(path),
            None => ctx.plan_workdir.clone(),
        };
        let timeout = parse_timeout(&test.duration)?;

        info!(guest = %guest.name(), test = %test.name, "Running test");
        let started = Instant::now();
        let outcome = guest.execute(&test.test, Some(&cwd), &env, Some(timeout)).await;
        let elapsed = started.elapsed();

        let (outcome, output, note) = match outcome {
            Ok(output) => (Outcome::Pass, output, None),
            Err(err) => Self::failed_outcome(&err),
        };

        let log = relative.join(OUTPUT_FILENAME);
        let mut content = output.stdout;
        content.push_str(&output.stderr);
        std::fs::write(ctx.step_workdir.join(&log), content)
            .wrap_err(ErrorKind::Execute, || format!("Failed to write log of test '{}'.", test.name))?;

        info!(guest = %guest.name(), test = %test.name, outcome = %outcome, "Test finished");
        let mut result = TestResult::new(test.name.clone(), outcome, elapsed)
            .with_guest(guest.name())
            .with_log(log);
        if let Some(note) = note {
            result = result.with_note(note);
        }
        Ok(result)
    }

    /// Outcome of a test whose command did not succeed
    fn failed_outcome(err: &Error) -> (Outcome, CommandOutput, Option<String>) {
        match err.source_as::<GuestError>() {
            Some(GuestError::CommandFailed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => (
                Outcome::from_exit_code(*exit_code),
                CommandOutput {
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                    exit_code: *exit_code,
                },
                None,
            ),
            Some(GuestError::Timeout { seconds, .. }) => (
                Outcome::Error,
                CommandOutput::default(),
                Some(format!("timeout after {} seconds", seconds)),
            ),
            _ => (Outcome::Error, CommandOutput::default(), Some(err.message().to_string())),
        }
    }
}

#[async_trait]
impl ExecutePlugin for InternalExecute {
    async fn go(
        &self,
        ctx: &PhaseContext,
        data: &StepData,
        guest: &GuestHandle,
        tests: &[TestDefinition],
    ) -> Result<Vec<TestResult>> {
        if ctx.dry {
            for test in tests.iter().filter(|t| t.enabled) {
                info!(guest = %guest.name(), test = %test.name, "Would run test (dry)");
            }
            return Ok(Vec::new());
        }

        guest.push(&ctx.plan_workdir, None, &TransferOptions::default()).await?;

        let exit_first = data.flag("exit-first");
        let mut results = Vec::new();
        for test in tests {
            if !test.enabled {
                debug!(test = %test.name, "Skipping disabled test");
                continue;
            }
            let result = Self::run_test(ctx, data, guest, test).await?;
            let stop = exit_first && matches!(result.outcome, Outcome::Fail | Outcome::Error);
            results.push(result);
            if stop {
                warn!(test = %test.name, "Stopping after the first failure");
                break;
            }
        }

        let guest_data = ctx.step_workdir.join("data").join(guest.safe_name());
        if guest_data.exists() {
            guest.pull(&guest_data, None).await?;
        }
        Ok(results)
    }
}
