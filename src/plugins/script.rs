//! Running user scripts on guests through a wrapper file

use crate::core::data::StepData;
use crate::core::error::{ErrorKind, Result, ResultExt};
use crate::core::names::joined_name;
use crate::guest::process::shell_quote;
use crate::guest::{topology, GuestHandle, TransferOptions};
use crate::plugin::PhaseContext;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PREPARE_WRAPPER_FILENAME: &str = "testcraft-prepare-wrapper.sh";
pub const FINISH_WRAPPER_FILENAME: &str = "testcraft-finish-wrapper.sh";

/// Prepended to every script so a failing command fails the script
pub const SHELL_OPTIONS: &str = "set -eo pipefail";

pub const PLAN_DATA_ENV: &str = "TESTCRAFT_PLAN_DATA";

/// Environment of commands run by a phase on a guest
///
/// Publishes the topology for this (step, phase, guest) triple as a side effect.
pub async fn guest_environment(
    ctx: &PhaseContext,
    data: &StepData,
    guest: &GuestHandle,
) -> Result<BTreeMap<String, String>> {
    let mut env = ctx.environment.clone();
    env.insert(
        PLAN_DATA_ENV.to_string(),
        ctx.plan_workdir.join("data").to_string_lossy().into_owned(),
    );
    env.extend(topology::publish(guest, &ctx.guests, &ctx.plan_workdir, ctx.step, &data.safe_name()).await?);
    Ok(env)
}

/// Wrapper file of a (phase, guest) pair
pub fn wrapper_path(ctx: &PhaseContext, base: &str, data: &StepData, guest: &GuestHandle) -> PathBuf {
    ctx.plan_workdir
        .join(joined_name(base, &[&data.safe_name(), &guest.safe_name()]))
}

/// Run each script on the guest, failures are raised with `kind`
pub async fn run_scripts(
    ctx: &PhaseContext,
    data: &StepData,
    guest: &GuestHandle,
    scripts: &[String],
    wrapper_base: &str,
    kind: ErrorKind,
) -> Result<()> {
    info!(
        phase = %data.name,
        guest = %guest.name(),
        "{} script{} found",
        scripts.len(),
        if scripts.len() == 1 { "" } else { "s" }
    );
    if scripts.is_empty() {
        return Ok(());
    }

    let env = guest_environment(ctx, data, guest)
        .await
        .map_err(|e| e.wrap(kind, format!("Failed to set up guest '{}'.", guest.name())))?;
    let wrapper = wrapper_path(ctx, wrapper_base, data, guest);
    debug!(wrapper = %wrapper.display(), "Script wrapper");

    for script in scripts {
        info!(phase = %data.name, guest = %guest.name(), script = %script, "Running script");
        if !ctx.dry {
            write_wrapper(&wrapper, script).map_err(|e| e.wrap(kind, "Failed to write script wrapper."))?;
        }
        let command = shell_quote(&wrapper.to_string_lossy());
        let result = async {
            guest
                .push(&wrapper, None, &TransferOptions { chmod: Some(0o755) })
                .await?;
            guest
                .execute(&command, Some(&ctx.plan_workdir), &env, None)
                .await
        }
        .await;
        result.map_err(|e| {
            e.wrap(
                kind,
                format!("Script '{}' failed on guest '{}'.", script, guest.name()),
            )
        })?;
    }
    Ok(())
}

fn write_wrapper(path: &Path, script: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err(ErrorKind::General, || format!("Failed to create '{}'.", parent.display()))?;
    }
    let content = format!("#!/bin/bash\n{}; {}\n", SHELL_OPTIONS, script);
    std::fs::write(path, content)
        .wrap_err(ErrorKind::General, || format!("Failed to write '{}'.", path.display()))?;
    set_executable(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .wrap_err(ErrorKind::General, || format!("Failed to chmod '{}'.", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
