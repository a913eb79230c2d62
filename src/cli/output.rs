//! CLI output formatting

use crate::core::result::ResultSummary;
use crate::core::state::ExecutionStatus;
use crate::execution::RunEvent;
use crate::persistence::RunSummary;
use crate::plugin::Method;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over the plans of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format test counts, green when nothing failed
pub fn format_results(summary: &ResultSummary) -> String {
    if summary.is_success() {
        style(summary).green().to_string()
    } else {
        style(summary).red().to_string()
    }
}

/// Format a history entry for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{} plans) - {} - {}",
        status_icon,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(&summary.run_id).bold(),
        format_status(summary.status),
        summary.completed_plans,
        summary.total_plans,
        style(&summary.results).cyan(),
        style(summary.workdir.display()).dim()
    )
}

/// Format a method listing line
pub fn format_method(method: &Method) -> String {
    format!(
        "  {:<12} {} {}",
        style(method.name).bold(),
        style(format!("[{}]", method.order)).dim(),
        method.doc
    )
}

/// Format a run event for display
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted { id, workdir, plans } => format!(
            "{} Starting run {} with {} plan(s) in {}",
            ROCKET,
            style(id).bold(),
            style(plans).cyan(),
            style(workdir.display()).dim()
        ),
        RunEvent::PlanStarted { plan } => format!("{} {}", INFO, style(plan).bold()),
        RunEvent::StepStarted { plan, step } => {
            format!("{} {} {}", SPINNER, style(plan).dim(), style(step).cyan())
        }
        RunEvent::StepSkipped { plan, step } => format!(
            "{} {} {} {}",
            SKIP,
            style(plan).dim(),
            style(step).dim(),
            style("(already done)").dim()
        ),
        RunEvent::StepCompleted { plan, step } => {
            format!("{} {} {}", CHECK, style(plan).dim(), style(step).green())
        }
        RunEvent::StepFailed { plan, step, error } => format!(
            "{} {} {}: {}",
            CROSS,
            style(plan).dim(),
            style(step).red(),
            style(error).dim()
        ),
        RunEvent::PlanCompleted { plan, summary } => {
            let icon = if summary.is_success() { CHECK } else { WARN };
            format!("{} {} {}", icon, style(plan).bold(), format_results(summary))
        }
        RunEvent::PlanFailed { plan, error } => {
            format!("{} {} {}", CROSS, style(plan).bold(), style(error).red())
        }
        RunEvent::RunCompleted { id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                _ => format!("{:?}", status),
            };
            format!("{} Run {} {}", INFO, style(id).dim(), status_str)
        }
    }
}
