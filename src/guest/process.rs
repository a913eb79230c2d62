//! Local subprocess runner shared by the guest transports

use crate::guest::{CommandOutput, GuestError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How to run a local process
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Render a program and its arguments for logs and errors
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

/// Quote a value for a POSIX shell when it needs it
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Run a program to completion and capture its output
///
/// # Errors
/// Returns `GuestError` if:
/// - the program cannot be spawned
/// - it does not finish within the timeout
/// - it exits with a non-zero status
pub async fn run_process(
    program: &str,
    args: &[String],
    options: &ProcessOptions,
) -> Result<CommandOutput, GuestError> {
    let rendered = render_command(program, args);
    debug!(command = %rendered, "Spawning process");

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }

    let pending = command.output();
    let result = match options.timeout {
        Some(limit) => timeout(limit, pending).await.map_err(|_| GuestError::Timeout {
            command: rendered.clone(),
            seconds: limit.as_secs(),
        })?,
        None => pending.await,
    };

    let output = result.map_err(|source| GuestError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code();

    if !output.status.success() {
        warn!(command = %rendered, exit_code = ?exit_code, "{}", stderr.trim());
        return Err(GuestError::CommandFailed {
            command: rendered,
            exit_code,
            stdout,
            stderr,
        });
    }

    debug!(command = %rendered, bytes = stdout.len(), "Process finished");
    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}
