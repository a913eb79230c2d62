//! Test results and durations

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// File holding the results inside the execute step workdir
pub const RESULTS_FILENAME: &str = "results.yaml";

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Warn,
    Skip,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
            Outcome::Warn => "warn",
            Outcome::Skip => "skip",
        }
    }

    /// Outcome of a finished test command
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Outcome::Pass,
            Some(1) => Outcome::Fail,
            _ => Outcome::Error,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one test on one guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: Outcome,

    /// Wall clock time in `HH:MM:SS`
    pub duration: String,

    /// Guest the test ran on
    #[serde(default)]
    pub guest: Option<String>,

    /// Log files relative to the execute workdir, primary log first
    #[serde(default)]
    pub log: Vec<PathBuf>,

    #[serde(default)]
    pub note: Option<String>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, outcome: Outcome, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            outcome,
            duration: seconds_to_duration(elapsed.as_secs()),
            guest: None,
            log: Vec::new(),
            note: None,
        }
    }

    pub fn with_guest(mut self, guest: impl Into<String>) -> Self {
        self.guest = Some(guest.into());
        self
    }

    pub fn with_log(mut self, log: PathBuf) -> Self {
        self.log.push(log);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Elapsed seconds parsed back from the duration string
    pub fn seconds(&self) -> Result<u64> {
        duration_to_seconds(&self.duration)
    }
}

/// Convert `HH:MM:SS` into total seconds
///
/// Exactly three colon separated numeric fields are required; minutes and
/// seconds must be below 60.
pub fn duration_to_seconds(duration: &str) -> Result<u64> {
    let malformed = || Error::general(format!("Malformed duration '{}'.", duration));

    let parts: Vec<&str> = duration.split(':').collect();
    if parts.len() != 3 {
        return Err(malformed());
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.len() < 2 || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        *slot = part.parse().map_err(|_| malformed())?;
    }
    let [hours, minutes, seconds] = numbers;
    if minutes >= 60 || seconds >= 60 {
        return Err(malformed());
    }
    hours
        .checked_mul(3600)
        .and_then(|total| total.checked_add(minutes * 60 + seconds))
        .ok_or_else(malformed)
}

/// Format total seconds as `HH:MM:SS`
pub fn seconds_to_duration(total: u64) -> String {
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse a test timeout such as `5m`, `1h`, `90` or `2h 30m`
///
/// A bare number means seconds; `d`, `h`, `m` and `s` suffixes are known.
pub fn parse_timeout(value: &str) -> Result<Duration> {
    let invalid = || Error::specification(format!("Invalid test duration '{}'.", value));

    let mut total = 0u64;
    let mut seen = false;
    for token in value.split_whitespace() {
        let (number, multiplier) = match token.chars().last() {
            Some('d') => (&token[..token.len() - 1], 86_400),
            Some('h') => (&token[..token.len() - 1], 3600),
            Some('m') => (&token[..token.len() - 1], 60),
            Some('s') => (&token[..token.len() - 1], 1),
            _ => (token, 1),
        };
        let number: f64 = number.parse().map_err(|_| invalid())?;
        let seconds = (number * multiplier as f64).round();
        if !seconds.is_finite() || seconds < 0.0 || seconds >= u64::MAX as f64 {
            return Err(invalid());
        }
        total = total.checked_add(seconds as u64).ok_or_else(invalid)?;
        seen = true;
    }
    if !seen {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

/// Outcome counts of a set of results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub warn: usize,
    pub skip: usize,
}

impl ResultSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                Outcome::Pass => summary.pass += 1,
                Outcome::Fail => summary.fail += 1,
                Outcome::Error => summary.error += 1,
                Outcome::Warn => summary.warn += 1,
                Outcome::Skip => summary.skip += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.error + self.warn + self.skip
    }

    /// No failed or errored test
    pub fn is_success(&self) -> bool {
        self.fail == 0 && self.error == 0
    }
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (count, label) in [
            (self.pass, "passed"),
            (self.fail, "failed"),
            (self.error, "errored"),
            (self.warn, "warned"),
            (self.skip, "skipped"),
        ] {
            if count > 0 {
                parts.push(format!("{} {}", count, label));
            }
        }
        if parts.is_empty() {
            f.write_str("no results")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(duration_to_seconds("00:00:00").unwrap(), 0);
        assert_eq!(duration_to_seconds("01:02:03").unwrap(), 3723);
        assert_eq!(duration_to_seconds("100:00:01").unwrap(), 360_001);
    }

    #[test]
    fn test_malformed_duration_fails() {
        for bad in ["1:2", "", "01:02", "01:02:03:04", "aa:bb:cc", "00:61:00", "1:02:03", "-1:00:00"] {
            assert!(duration_to_seconds(bad).is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_seconds_to_duration() {
        assert_eq!(seconds_to_duration(3723), "01:02:03");
        assert_eq!(seconds_to_duration(0), "00:00:00");
        assert_eq!(duration_to_seconds(&seconds_to_duration(86_399)).unwrap(), 86_399);
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_timeout("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_timeout("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_timeout("2h 30m").unwrap(), Duration::from_secs(9000));
        assert!(parse_timeout("soon").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn test_parse_timeout_rejects_non_finite_and_overflow() {
        for bad in ["nan", "inf", "-inf", "infm", "inf inf", "-5m", "1e300", "10000000000000000000 10000000000000000000"] {
            let err = parse_timeout(bad).unwrap_err();
            assert_eq!(err.kind(), crate::core::error::ErrorKind::Specification, "{}", bad);
        }
        assert!(duration_to_seconds("9999999999999999999:00:00").is_err());
    }

    #[test]
    fn test_outcome_from_exit_code() {
        assert_eq!(Outcome::from_exit_code(Some(0)), Outcome::Pass);
        assert_eq!(Outcome::from_exit_code(Some(1)), Outcome::Fail);
        assert_eq!(Outcome::from_exit_code(Some(2)), Outcome::Error);
        assert_eq!(Outcome::from_exit_code(None), Outcome::Error);
    }

    #[test]
    fn test_summary() {
        let results = vec![
            TestResult::new("/a", Outcome::Pass, Duration::from_secs(1)),
            TestResult::new("/b", Outcome::Fail, Duration::from_secs(2)),
            TestResult::new("/c", Outcome::Pass, Duration::from_secs(3)),
        ];
        let summary = ResultSummary::from_results(&results);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
        assert_eq!(summary.to_string(), "2 passed, 1 failed");
    }
}
