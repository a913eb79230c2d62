//! Prepare phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::error::{Error, ErrorKind, Result};
use crate::guest::process::shell_quote;
use crate::guest::GuestHandle;
use crate::plugin::{Method, PhaseContext, PreparePlugin};
use crate::plugins::script::{run_scripts, PREPARE_WRAPPER_FILENAME};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

const SCRIPT: FieldSpec = FieldSpec::list("script", "Shell script to be executed. Can be used multiple times.")
    .with_short('s')
    .with_metavar("SCRIPT");

const SHELL_FIELDS: &[FieldSpec] = &[SCRIPT];

const INSTALL_FIELDS: &[FieldSpec] = &[FieldSpec::list("package", "Package to install. Can be used multiple times.")
    .with_short('p')
    .with_metavar("PACKAGE")];

const DISTGIT_FIELDS: &[FieldSpec] = &[
    SCRIPT,
    FieldSpec::flag("install-build-require", "Install build requirements of the spec file."),
    FieldSpec::text("spec", "Spec file, relative to the plan workdir.").with_metavar("SPEC"),
];

pub const SHELL: Method = Method::new("shell", "Prepare the guest using shell scripts.", 50, SHELL_FIELDS);

pub const INSTALL: Method = Method::new(
    "install",
    "Install packages with the guest's package manager.",
    50,
    INSTALL_FIELDS,
);

pub const DISTGIT: Method = Method::new(
    "distgit",
    "Install build requirements of a dist-git package, then run scripts.",
    50,
    DISTGIT_FIELDS,
);

pub struct ShellPrepare;

#[async_trait]
impl PreparePlugin for ShellPrepare {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()> {
        run_scripts(
            ctx,
            data,
            guest,
            data.list("script"),
            PREPARE_WRAPPER_FILENAME,
            ErrorKind::Prepare,
        )
        .await
    }
}

/// Package managers looked up on the guest, first found wins
const PACKAGE_MANAGERS: &[&str] = &["dnf", "yum", "apt-get"];

/// Install command for the given package manager
pub fn install_command(manager: &str, packages: &[String]) -> String {
    let packages = packages.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ");
    format!("{} install -y {}", manager, packages)
}

pub struct InstallPrepare;

impl InstallPrepare {
    async fn detect_manager(ctx: &PhaseContext, guest: &GuestHandle) -> Result<String> {
        let detect = PACKAGE_MANAGERS
            .iter()
            .map(|m| format!("command -v {}", m))
            .collect::<Vec<_>>()
            .join(" || ");
        let output = guest
            .execute(&detect, None, &BTreeMap::new(), None)
            .await
            .map_err(|e| e.wrap(ErrorKind::Prepare, format!("No package manager found on guest '{}'.", guest.name())))?;

        let found = output
            .stdout
            .lines()
            .filter_map(|line| line.trim().rsplit('/').next())
            .find(|name| PACKAGE_MANAGERS.contains(name))
            .map(str::to_string);
        match found {
            Some(manager) => Ok(manager),
            // dry runs report nothing
            None if ctx.dry => Ok(PACKAGE_MANAGERS[0].to_string()),
            None => Err(Error::prepare(format!(
                "No supported package manager found on guest '{}'.",
                guest.name()
            ))),
        }
    }
}

#[async_trait]
impl PreparePlugin for InstallPrepare {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()> {
        let packages = data.list("package");
        if packages.is_empty() {
            info!(phase = %data.name, "No packages to install");
            return Ok(());
        }
        let manager = Self::detect_manager(ctx, guest).await?;
        info!(phase = %data.name, guest = %guest.name(), manager = %manager, "Installing {}", packages.join(", "));
        guest
            .execute(&install_command(&manager, packages), None, &ctx.environment, None)
            .await
            .map_err(|e| {
                e.wrap(
                    ErrorKind::Prepare,
                    format!("Failed to install packages on guest '{}'.", guest.name()),
                )
            })?;
        Ok(())
    }
}

/// Build requirement installation for a spec file
///
/// `rpmbuild -br` generates a buildreqs source package when dependencies
/// are missing; `dnf builddep` then installs them from it.
pub fn build_requires_command(topdir: &str, spec: &str) -> String {
    format!(
        "rpmbuild --define {} -br {} || dnf builddep -y {}/SRPMS/*buildreqs.nosrc.rpm",
        shell_quote(&format!("_topdir {}", topdir)),
        shell_quote(spec),
        shell_quote(topdir)
    )
}

pub struct DistGitPrepare;

#[async_trait]
impl PreparePlugin for DistGitPrepare {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()> {
        if data.flag("install-build-require") {
            let spec = data.text("spec").ok_or_else(|| {
                Error::prepare(format!(
                    "Phase '{}' installs build requirements but names no 'spec' file.",
                    data.name
                ))
            })?;
            let topdir = ctx.plan_workdir.join("rpmbuild");
            let command = build_requires_command(&topdir.to_string_lossy(), spec);
            info!(phase = %data.name, guest = %guest.name(), spec = %spec, "Installing build requirements");
            guest
                .execute(&command, Some(&ctx.plan_workdir), &ctx.environment, None)
                .await
                .map_err(|e| {
                    e.wrap(
                        ErrorKind::Prepare,
                        format!("Failed to install build requirements of '{}'.", spec),
                    )
                })?;
        }

        run_scripts(
            ctx,
            data,
            guest,
            data.list("script"),
            PREPARE_WRAPPER_FILENAME,
            ErrorKind::Prepare,
        )
        .await
    }
}
