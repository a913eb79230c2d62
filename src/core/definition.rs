//! Discovered test definitions

use crate::core::names::safe_name;
use crate::library::LibraryIdentifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File holding discovered tests inside the discover step workdir
pub const TESTS_FILENAME: &str = "tests.yaml";

fn default_duration() -> String {
    "5m".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A single test as produced by discover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Test name, usually starting with a slash
    pub name: String,

    /// Shell script to run on the guest
    pub test: String,

    /// Directory of the test relative to the discover workdir
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum run time, e.g. `5m`
    #[serde(default = "default_duration")]
    pub duration: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Libraries to fetch into the test directory
    #[serde(default)]
    pub require: Vec<LibraryIdentifier>,
}

impl TestDefinition {
    pub fn new(name: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            test: test.into(),
            path: None,
            duration: default_duration(),
            enabled: true,
            environment: BTreeMap::new(),
            require: Vec::new(),
        }
    }

    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults() {
        let yaml = "name: /smoke\ntest: ./run.sh\n";
        let test: TestDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(test, TestDefinition::new("/smoke", "./run.sh"));
        assert_eq!(test.safe_name(), "smoke");
    }
}
