//! Step segments of `run` and their method specific options
//!
//! Which options a step accepts depends on the method selected by `--how`,
//! so a step segment is parsed in two passes: [`sniff_how`] scans the raw
//! tokens for the method, then the command built by [`method_command`] from
//! that method's field table parses the segment strictly.

use crate::core::data::{FieldKind, FieldSpec, FieldValue};
use crate::core::error::{Error, Result};
use crate::core::plan::StepOverride;
use crate::core::step::{StepKind, SUBCOMMANDS};
use crate::plugin::{Method, Registries};
use clap::error::ErrorKind as ClapErrorKind;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Segment names which select plans or tests instead of a step
const FILTERS: &[&str] = &["plans", "tests"];

/// Find the `--how` value among raw step arguments
///
/// Tokens are scanned left to right and the first matching rule wins:
/// `--how X` and `-h X` take the next token, `--how=X` and `-hX` the rest
/// of the token. A token which is a prefix of any subcommand ends the scan,
/// it belongs to the next segment.
pub fn sniff_how<S: AsRef<str>>(tokens: &[S]) -> Option<String> {
    let mut tokens = tokens.iter().map(AsRef::as_ref);
    while let Some(token) = tokens.next() {
        if token == "--how" || token == "-h" {
            return tokens.next().map(str::to_string);
        }
        if let Some(how) = token.strip_prefix("--how=") {
            return Some(how.to_string());
        }
        if let Some(how) = token.strip_prefix("-h") {
            if !how.starts_with('-') {
                return Some(how.strip_prefix(' ').unwrap_or(how).to_string());
            }
        }
        if SUBCOMMANDS.iter().any(|sub| sub.starts_with(token)) {
            break;
        }
    }
    None
}

/// A run argument segment: its name and the tokens following it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub args: Vec<String>,
}

/// Split trailing `run` arguments at step names and `plans`/`tests`
pub fn split_segments(args: &[String]) -> Result<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();
    for arg in args {
        let is_boundary =
            StepKind::ALL.iter().any(|kind| kind.as_str() == arg) || FILTERS.contains(&arg.as_str());
        if is_boundary {
            segments.push(Segment {
                name: arg.clone(),
                args: Vec::new(),
            });
            continue;
        }
        match segments.last_mut() {
            Some(segment) => segment.args.push(arg.clone()),
            None => {
                return Err(Error::specification(format!(
                    "Unknown step '{}', expected one of: {}.",
                    arg,
                    StepKind::ALL.map(|kind| kind.as_str()).join(", ")
                )))
            }
        }
    }
    Ok(segments)
}

/// Command line options of a field
fn field_arg(field: &FieldSpec) -> Arg {
    let mut arg = Arg::new(field.key).long(field.option).help(field.help);
    if let Some(short) = field.short {
        arg = arg.short(short);
    }
    if !field.metavar.is_empty() {
        arg = arg.value_name(field.metavar);
    }
    match field.kind {
        FieldKind::Flag => arg.action(ArgAction::SetTrue),
        FieldKind::Integer => arg.action(ArgAction::Set).value_parser(clap::value_parser!(i64)),
        FieldKind::List => arg.action(ArgAction::Append),
        FieldKind::Text | FieldKind::Data => arg.action(ArgAction::Set),
    }
}

/// Build the parser of a step segment
///
/// Without a method only the options common to every step are known.
pub fn method_command(step: StepKind, method: Option<&Method>) -> Command {
    let mut command = Command::new(step.as_str())
        .no_binary_name(true)
        .disable_help_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .action(ArgAction::Help)
                .help("Show this message and exit."),
        )
        .arg(
            Arg::new("how")
                .short('h')
                .long("how")
                .value_name("METHOD")
                .help("Use specified method."),
        )
        .arg(
            Arg::new("dry")
                .short('n')
                .long("dry")
                .action(ArgAction::SetTrue)
                .help("Run in dry mode. No changes, please."),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Run the step again even if it is done."),
        );

    if let Some(method) = method {
        command = command.about(format!("{} ({})", method.doc, method.name));
        for field in method.fields.iter().filter(|field| field.is_cli_option()) {
            command = command.arg(field_arg(field));
        }
    }
    command
}

/// Field values given explicitly on the command line
fn cli_options(method: &Method, matches: &ArgMatches) -> Result<BTreeMap<String, FieldValue>> {
    let mut options = BTreeMap::new();
    for field in method.fields.iter().filter(|field| field.is_cli_option()) {
        if matches.value_source(field.key) != Some(ValueSource::CommandLine) {
            continue;
        }
        let raw = match field.kind {
            FieldKind::Flag => Value::Bool(matches.get_flag(field.key)),
            FieldKind::Integer => match matches.get_one::<i64>(field.key) {
                Some(value) => Value::Number((*value).into()),
                None => continue,
            },
            FieldKind::List => Value::Sequence(
                matches
                    .get_many::<String>(field.key)
                    .into_iter()
                    .flatten()
                    .map(|value| Value::String(value.clone()))
                    .collect(),
            ),
            FieldKind::Text | FieldKind::Data => match matches.get_one::<String>(field.key) {
                Some(value) => Value::String(value.clone()),
                None => continue,
            },
        };
        options.insert(field.key.to_string(), field.normalize_value(&raw)?);
    }
    Ok(options)
}

/// Method matching a sniffed `how`, first by priority, without any hints
/// Parsed form of one step segment
#[derive(Debug, Clone, PartialEq)]
pub enum StepArgs {
    Override(StepOverride),
    /// `--help` was given, rendered help text
    Help(String),
}

/// Parse the arguments of a step segment
///
/// An unknown method is kept in the override so building the plan reports
/// it, the segment itself is parsed with the common options only.
pub fn parse_step_args(registries: &Registries, step: StepKind, args: &[String]) -> Result<StepArgs> {
    let how = sniff_how(args);
    let method = match &how {
        Some(how) => registries.find_method(step, how),
        None => registries.methods(step).into_iter().next(),
    };
    debug!(step = %step, how = ?how, method = ?method.map(|m| m.name), "Parsing step options");

    let matches = match method_command(step, method).try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) if err.kind() == ClapErrorKind::DisplayHelp => {
            return Ok(StepArgs::Help(err.render().to_string()))
        }
        Err(err) => {
            return Err(Error::specification(format!(
                "Invalid {} options: {}",
                step,
                err.render().to_string().trim()
            )))
        }
    };

    let options = match method {
        Some(method) => cli_options(method, &matches)?,
        None => BTreeMap::new(),
    };
    Ok(StepArgs::Override(StepOverride {
        how: how.or_else(|| matches.get_one::<String>("how").cloned()),
        options,
        dry: matches.get_flag("dry"),
        force: matches.get_flag("force"),
    }))
}

fn filter_command(name: &'static str) -> Command {
    Command::new(name).no_binary_name(true).arg(
        Arg::new("name")
            .short('n')
            .long("name")
            .value_name("REGEX")
            .required(true)
            .help("Regular expression to match the name."),
    )
}

enum FilterArgs {
    Pattern(Regex),
    Help(String),
}

fn parse_filter(name: &'static str, args: &[String]) -> Result<FilterArgs> {
    let matches = match filter_command(name).try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) if err.kind() == ClapErrorKind::DisplayHelp => return Ok(FilterArgs::Help(err.render().to_string())),
        Err(err) => {
            return Err(Error::specification(format!(
                "Invalid {} options: {}",
                name,
                err.render().to_string().trim()
            )))
        }
    };
    let pattern = matches.get_one::<String>("name").cloned().unwrap_or_default();
    Regex::new(&pattern)
        .map(FilterArgs::Pattern)
        .map_err(|err| Error::specification(format!("Invalid {} name pattern '{}'.", name, pattern)).with_source(err))
}

/// What the trailing `run` arguments select
#[derive(Debug, Default)]
pub struct RunSelection {
    /// Steps named on the command line with their adjustments
    pub steps: BTreeMap<StepKind, StepOverride>,
    pub plan_filter: Option<Regex>,
    pub test_filter: Option<Regex>,
    /// Help requested for one of the segments
    pub help: Option<String>,
}

impl RunSelection {
    /// Parse every trailing segment
    pub fn parse(registries: &Registries, args: &[String]) -> Result<Self> {
        let mut selection = Self::default();
        for segment in split_segments(args)? {
            match segment.name.parse::<StepKind>() {
                Ok(step) => match parse_step_args(registries, step, &segment.args)? {
                    StepArgs::Override(step_override) => {
                        selection.steps.insert(step, step_override);
                    }
                    StepArgs::Help(help) => {
                        selection.help = Some(help);
                        return Ok(selection);
                    }
                },
                Err(_) => {
                    let plans = segment.name == "plans";
                    let name = if plans { "plans" } else { "tests" };
                    match parse_filter(name, &segment.args)? {
                        FilterArgs::Pattern(regex) if plans => selection.plan_filter = Some(regex),
                        FilterArgs::Pattern(regex) => selection.test_filter = Some(regex),
                        FilterArgs::Help(help) => {
                            selection.help = Some(help);
                            return Ok(selection);
                        }
                    }
                }
            }
        }
        Ok(selection)
    }

    /// Whether a step runs, all of them when none is named
    pub fn runs_step(&self, step: StepKind, all: bool) -> bool {
        all || self.steps.is_empty() || self.steps.contains_key(&step)
    }

    pub fn wants_plan(&self, name: &str) -> bool {
        self.plan_filter.as_ref().map_or(true, |re| re.is_match(name))
    }
}
