//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run test plans
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the plans YAML file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Run id, an existing run is resumed
    #[arg(short, long)]
    pub id: Option<String>,

    /// Directory holding run workdirs
    #[arg(long)]
    pub workdir_root: Option<PathBuf>,

    /// Run in dry mode. No changes, please.
    #[arg(short = 'n', long)]
    pub dry: bool,

    /// Run every selected step again even if it is done
    #[arg(short, long)]
    pub force: bool,

    /// Run all steps, customize some
    #[arg(short, long)]
    pub all: bool,

    /// Remove the run workdir before starting
    #[arg(long)]
    pub scratch: bool,

    /// Number of plans run concurrently
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Environment variables (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub environment: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Steps and filters: `<step> [options]`, `plans --name REGEX`, `tests --name REGEX`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "STEP")]
    pub segments: Vec<String>,
}

impl RunCommand {
    pub fn strategy(&self) -> SchedulingStrategy {
        SchedulingStrategy::from_workers(self.max_workers)
    }
}

/// Validate a plans file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the plans YAML file
    #[arg(long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List step methods
#[derive(Debug, Args, Clone)]
pub struct MethodsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show recent runs
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
