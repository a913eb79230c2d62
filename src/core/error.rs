//! Domain error taxonomy
//!
//! Every failure surfaced by a step carries a kind, a message and an
//! ordered list of causing errors. Lower level failures (I/O, transport)
//! are kept as the boxed `source` so nothing is lost on the way up.

use std::error::Error as StdError;
use std::fmt;

/// Boxed lower level failure attached to a domain error
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Which part of the system raised the error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Failure not tied to a particular step
    General,
    /// Malformed or unsupported configuration
    Specification,
    Discover,
    Provision,
    Prepare,
    Execute,
    Report,
    Finish,
    /// No files matched the requested library patterns
    Library,
    /// A command failed on a guest or on the local host
    Run,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::General => "GeneralError",
            ErrorKind::Specification => "SpecificationError",
            ErrorKind::Discover => "DiscoverError",
            ErrorKind::Provision => "ProvisionError",
            ErrorKind::Prepare => "PrepareError",
            ErrorKind::Execute => "ExecuteError",
            ErrorKind::Report => "ReportError",
            ErrorKind::Finish => "FinishError",
            ErrorKind::Library => "LibraryError",
            ErrorKind::Run => "RunError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain error with its cause chain
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    causes: Vec<Error>,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
            source: None,
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::General, message)
    }

    pub fn specification(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Specification, message)
    }

    pub fn provision(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provision, message)
    }

    pub fn prepare(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Prepare, message)
    }

    pub fn execute(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execute, message)
    }

    pub fn report(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Report, message)
    }

    pub fn library(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Library, message)
    }

    pub fn run(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Run, message)
    }

    /// Append a causing domain error
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.causes.push(cause);
        self
    }

    /// Append several causing domain errors, keeping their order
    pub fn with_causes(mut self, causes: impl IntoIterator<Item = Error>) -> Self {
        self.causes.extend(causes);
        self
    }

    /// Attach the lower level failure this error wraps
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Wrap this error as the cause of a new one
    pub fn wrap(self, kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::new(kind, message).with_cause(self)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> &[Error] {
        &self.causes
    }

    /// "No files matched" condition raised by library fetching
    pub fn is_library_not_found(&self) -> bool {
        self.kind == ErrorKind::Library
    }

    /// Downcast the attached lower level failure
    pub fn source_as<T: StdError + 'static>(&self) -> Option<&T> {
        self.source.as_ref()?.downcast_ref::<T>()
    }

    /// Render kind, message and the whole cause chain, one per line
    pub fn render_chain(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        if depth == 0 {
            out.push_str(&format!("{}: {}\n", self.kind, self.message));
        } else {
            out.push_str(&format!("{}caused by: {}: {}\n", indent, self.kind, self.message));
        }

        let mut source: Option<&(dyn StdError + 'static)> =
            self.source.as_deref().map(|s| s as &(dyn StdError + 'static));
        let mut level = depth + 1;
        while let Some(err) = source {
            if let Some(domain) = err.downcast_ref::<Error>() {
                domain.render_into(out, level);
                break;
            }
            out.push_str(&format!("{}caused by: {}\n", "  ".repeat(level), err));
            source = err.source();
            level += 1;
        }

        for cause in &self.causes {
            cause.render_into(out, depth + 1);
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        if let Some(source) = &self.source {
            return Some(source.as_ref() as &(dyn StdError + 'static));
        }
        self.causes.first().map(|c| c as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::general(err.to_string()).with_source(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::general(format!("Invalid YAML: {}", err)).with_source(err)
    }
}

/// Attach a domain kind and message to a foreign error
pub trait ResultExt<T> {
    fn wrap_err<S: Into<String>>(self, kind: ErrorKind, message: impl FnOnce() -> S) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn wrap_err<S: Into<String>>(self, kind: ErrorKind, message: impl FnOnce() -> S) -> Result<T> {
        self.map_err(|e| Error::new(kind, message()).with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_chain_keeps_order() {
        let err = Error::prepare("prepare failed on 2 guests")
            .with_cause(Error::run("command 'a' returned 1"))
            .with_cause(Error::run("command 'b' returned 2"));

        assert_eq!(err.kind(), ErrorKind::Prepare);
        assert_eq!(err.causes().len(), 2);
        assert_eq!(err.causes()[0].message(), "command 'a' returned 1");
        assert_eq!(err.causes()[1].message(), "command 'b' returned 2");
    }

    #[test]
    fn test_render_chain_includes_every_level() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::prepare("phase failed")
            .with_cause(Error::run("script failed").with_source(io));

        let rendered = err.render_chain();
        assert!(rendered.starts_with("PrepareError: phase failed"));
        assert!(rendered.contains("caused by: RunError: script failed"));
        assert!(rendered.contains("caused by: no such file"));
    }

    #[test]
    fn test_source_downcast() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::run("wrapped").with_source(io);
        assert!(err.source_as::<std::io::Error>().is_some());
        assert!(err.source_as::<serde_yaml::Error>().is_none());
    }

    #[test]
    fn test_library_not_found_is_distinguishable() {
        assert!(Error::library("no files").is_library_not_found());
        assert!(!Error::run("clone failed").is_library_not_found());
    }
}
