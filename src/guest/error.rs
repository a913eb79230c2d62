//! Transport level errors

use crate::core::error::{Error, ErrorKind};

/// Failure of a guest transport operation
#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("Command '{command}' returned {}", describe_exit(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no exit code".to_string(),
    }
}

impl GuestError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GuestError::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit code of a failed command, if it got that far
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GuestError::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Wrap into a run error, keeping the transport failure as the source
    pub fn into_run_error(self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Run, message).with_source(self)
    }
}
