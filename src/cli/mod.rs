//! Command-line interface

pub mod commands;
pub mod method;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{MethodsCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Test orchestration tool
#[derive(Debug, Parser, Clone)]
#[command(name = "testcraft")]
#[command(version)]
#[command(about = "Discover, provision, prepare, execute, report and finish test plans", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show more details, can be given multiple times
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show debugging output, can be given multiple times
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Show only errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run test plans
    Run(RunCommand),

    /// Validate a plans file
    Validate(ValidateCommand),

    /// List step methods in priority order
    Methods(MethodsCommand),

    /// Show recent runs
    Status(StatusCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Log filter derived from the verbosity counters
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match (self.debug, self.verbose) {
            (0, 0) => "info",
            (0, _) => "testcraft=debug,info",
            (1, _) => "debug",
            _ => "trace",
        }
    }
}
