//! Discover phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::definition::TestDefinition;
use crate::core::error::{ErrorKind, Result, ResultExt};
use crate::plugin::{DiscoverPlugin, Method, PhaseContext};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

const SHELL_FIELDS: &[FieldSpec] = &[FieldSpec::data(
    "tests",
    "Tests given inline, each with a name and a test script.",
)];

pub const SHELL: Method = Method::new("shell", "Use tests listed directly in the plan.", 50, SHELL_FIELDS);

/// Tests listed inline in the plan, with optional library requirements
pub struct ShellDiscover;

impl ShellDiscover {
    fn parse_tests(data: &StepData) -> Result<Vec<TestDefinition>> {
        let Some(value) = data.value("tests").filter(|v| !v.is_null()) else {
            return Ok(Vec::new());
        };
        let mut tests: Vec<TestDefinition> = serde_yaml::from_value(value.clone())
            .wrap_err(ErrorKind::Specification, || {
                format!("Invalid tests in discover phase '{}'.", data.name)
            })?;
        for test in &mut tests {
            if !test.name.starts_with('/') {
                test.name = format!("/{}", test.name);
            }
        }
        Ok(tests)
    }

    async fn fetch_requirements(ctx: &PhaseContext, test: &TestDefinition, directory: &Path) -> Result<()> {
        for requirement in &test.require {
            if ctx.dry {
                debug!(test = %test.name, requirement = ?requirement, "Would fetch library (dry)");
                continue;
            }
            match ctx.run.libraries.fetch(requirement, directory).await {
                Ok(files) => debug!(test = %test.name, count = files.len(), "Library files fetched"),
                Err(err) if err.is_library_not_found() && requirement.optional => {
                    warn!(test = %test.name, "Optional library not found: {}", err.message());
                }
                Err(err) => {
                    return Err(err.wrap(
                        ErrorKind::Discover,
                        format!("Failed to fetch requirements of test '{}'.", test.name),
                    ))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DiscoverPlugin for ShellDiscover {
    async fn go(&self, ctx: &PhaseContext, data: &StepData) -> Result<Vec<TestDefinition>> {
        let mut tests = Self::parse_tests(data)?;
        tests.retain(|test| ctx.run.wants_test(&test.name));

        for test in &mut tests {
            let relative = Path::new("tests").join(test.safe_name());
            let directory = ctx.step_workdir.join(&relative);
            if !ctx.dry {
                std::fs::create_dir_all(&directory).wrap_err(ErrorKind::Discover, || {
                    format!("Failed to create '{}'.", directory.display())
                })?;
            }
            Self::fetch_requirements(ctx, test, &directory).await?;
            test.path = Some(relative.to_string_lossy().into_owned());
        }

        info!(phase = %data.name, "{} test{} discovered", tests.len(), if tests.len() == 1 { "" } else { "s" });
        Ok(tests)
    }
}
