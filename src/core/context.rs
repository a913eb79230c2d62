//! Run context - state shared by every plan of a run

use crate::library::LibraryCache;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Run-wide configuration and shared resources
///
/// Owned by the run engine and handed to phases behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run identifier, the name of the run workdir
    pub id: String,

    /// Run workdir, `<root>/<id>`
    pub workdir: PathBuf,

    /// Environment given on the command line and in the plans file
    pub environment: BTreeMap<String, String>,

    /// Do not perform any effectful operation
    pub dry: bool,

    /// Library working copies shared by all plans
    pub libraries: Arc<LibraryCache>,

    /// Only tests whose name matches are run
    pub test_filter: Option<Regex>,
}

impl RunContext {
    pub fn new(id: impl Into<String>, workdir: impl Into<PathBuf>, libraries: Arc<LibraryCache>) -> Self {
        Self {
            id: id.into(),
            workdir: workdir.into(),
            environment: BTreeMap::new(),
            dry: false,
            libraries,
            test_filter: None,
        }
    }

    /// Set an environment variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }

    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.environment.get(key)
    }

    /// Workdir of a plan, the plan name without its leading slash
    pub fn plan_workdir(&self, plan_name: &str) -> PathBuf {
        let relative = plan_name.trim_start_matches('/');
        let relative = if relative.is_empty() { "default" } else { relative };
        self.workdir.join("plans").join(relative)
    }

    /// Whether a test passes the name filter
    pub fn wants_test(&self, name: &str) -> bool {
        self.test_filter.as_ref().map_or(true, |re| re.is_match(name))
    }
}
