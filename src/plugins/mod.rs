//! Built-in phase implementations

pub mod discover;
pub mod execute;
pub mod finish;
pub mod prepare;
pub mod provision;
pub mod report;
pub mod script;

use crate::plugin::Registries;
use std::sync::Arc;

/// Register every built-in method
pub fn register_builtin(registries: &mut Registries) {
    registries
        .discover
        .register(discover::SHELL, Arc::new(discover::ShellDiscover));

    registries
        .provision
        .register(provision::LOCAL, Arc::new(provision::LocalProvision));
    registries
        .provision
        .register(provision::CONTAINER, Arc::new(provision::ContainerProvision));
    registries
        .provision
        .register(provision::CONNECT, Arc::new(provision::ConnectProvision));

    registries
        .prepare
        .register(prepare::SHELL, Arc::new(prepare::ShellPrepare));
    registries
        .prepare
        .register(prepare::INSTALL, Arc::new(prepare::InstallPrepare));
    registries
        .prepare
        .register(prepare::DISTGIT, Arc::new(prepare::DistGitPrepare));

    registries
        .execute
        .register(execute::INTERNAL, Arc::new(execute::InternalExecute));

    registries
        .report
        .register(report::DISPLAY, Arc::new(report::DisplayReport));
    registries
        .report
        .register(report::JUNIT, Arc::new(report::JUnitReport));

    registries
        .finish
        .register(finish::SHELL, Arc::new(finish::ShellFinish));
}
