//! Report phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::error::{ErrorKind, Result, ResultExt};
use crate::core::result::{duration_to_seconds, Outcome, ResultSummary, TestResult};
use crate::core::step::StepKind;
use crate::plugin::{Method, PhaseContext, ReportPlugin};
use async_trait::async_trait;
use console::style;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

const DISPLAY_FIELDS: &[FieldSpec] = &[];

const JUNIT_FIELDS: &[FieldSpec] = &[FieldSpec::text("file", "Path to the junit file to write.")
    .with_metavar("PATH")];

pub const DISPLAY: Method = Method::new("display", "Show test results on the terminal.", 50, DISPLAY_FIELDS);

pub const JUNIT: Method = Method::new("junit", "Save test results in the junit xml format.", 50, JUNIT_FIELDS);

pub const JUNIT_FILENAME: &str = "junit.xml";

fn styled_outcome(outcome: Outcome) -> String {
    let label = format!("{:>5}", outcome.as_str());
    match outcome {
        Outcome::Pass => style(label).green().to_string(),
        Outcome::Fail | Outcome::Error => style(label).red().to_string(),
        Outcome::Warn => style(label).yellow().to_string(),
        Outcome::Skip => style(label).dim().to_string(),
    }
}

fn separator() -> String {
    let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80).min(120);
    "-".repeat(width)
}

pub struct DisplayReport;

#[async_trait]
impl ReportPlugin for DisplayReport {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, results: &[TestResult]) -> Result<()> {
        let summary = ResultSummary::from_results(results);
        info!(phase = %data.name, plan = %ctx.plan_name, "{}", summary);

        println!("{}", style(separator()).dim());
        for result in results {
            let guest = result
                .guest
                .as_deref()
                .map(|g| format!(" {}", style(format!("({})", g)).dim()))
                .unwrap_or_default();
            println!("{} {}{}", styled_outcome(result.outcome), result.name, guest);
            if let Some(note) = &result.note {
                println!("      {}", style(note).dim());
            }
        }
        println!("{}", style(separator()).dim());
        let line = format!("{}: {}", ctx.plan_name, summary);
        if summary.is_success() {
            println!("{}", style(line).green());
        } else {
            println!("{}", style(line).red());
        }
        Ok(())
    }
}

/// Escape text for use inside xml content and attributes
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\n' | '\r' | '\t') => {}
            c => out.push(c),
        }
    }
    out
}

/// Render results as a junit document
///
/// `read_log` gives the primary log content of a result, if any.
pub fn render_junit(
    suite: &str,
    results: &[TestResult],
    read_log: impl Fn(&TestResult) -> Option<String>,
) -> String {
    let summary = ResultSummary::from_results(results);
    let total_time: u64 = results.iter().filter_map(|r| r.seconds().ok()).sum();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuites>\n  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{}\">",
        escape_xml(suite),
        summary.total(),
        summary.fail,
        summary.error,
        summary.skip,
        total_time
    );

    for result in results {
        let time = duration_to_seconds(&result.duration).unwrap_or(0);
        let _ = writeln!(
            xml,
            "    <testcase name=\"{}\" classname=\"{}\" time=\"{}\">",
            escape_xml(&result.name),
            escape_xml(result.guest.as_deref().unwrap_or(suite)),
            time
        );
        let message = escape_xml(result.note.as_deref().unwrap_or(result.outcome.as_str()));
        match result.outcome {
            Outcome::Fail => {
                let _ = writeln!(xml, "      <failure type=\"FAIL\" message=\"{}\"/>", message);
            }
            Outcome::Error => {
                let _ = writeln!(xml, "      <error type=\"ERROR\" message=\"{}\"/>", message);
            }
            Outcome::Skip => {
                let _ = writeln!(xml, "      <skipped type=\"SKIP\" message=\"{}\"/>", message);
            }
            Outcome::Pass | Outcome::Warn => {}
        }
        if let Some(log) = read_log(result) {
            let _ = writeln!(xml, "      <system-out>{}</system-out>", escape_xml(&log));
        }
        xml.push_str("    </testcase>\n");
    }
    xml.push_str("  </testsuite>\n</testsuites>\n");
    xml
}

pub struct JUnitReport;

#[async_trait]
impl ReportPlugin for JUnitReport {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, results: &[TestResult]) -> Result<()> {
        let path = data
            .text("file")
            .map(PathBuf::from)
            .unwrap_or_else(|| ctx.step_workdir.join(JUNIT_FILENAME));
        if ctx.dry {
            info!(phase = %data.name, path = %path.display(), "Would write junit report (dry)");
            return Ok(());
        }

        let execute_dir = ctx.step_dir(StepKind::Execute);
        let xml = render_junit(&ctx.plan_name, results, |result| {
            let log = result.log.first()?;
            std::fs::read_to_string(execute_dir.join(log)).ok()
        });

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err(ErrorKind::Report, || format!("Failed to create '{}'.", parent.display()))?;
        }
        std::fs::write(&path, xml)
            .wrap_err(ErrorKind::Report, || format!("Failed to write '{}'.", path.display()))?;
        info!(phase = %data.name, path = %path.display(), "Junit report written");
        Ok(())
    }
}
