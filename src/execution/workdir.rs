//! Workdir layout: run directories and persisted step outputs

use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_WORKDIR_ROOT: &str = "/var/tmp/testcraft";
pub const WORKDIR_ROOT_ENV: &str = "TESTCRAFT_WORKDIR_ROOT";
pub const RUN_RECORD_FILENAME: &str = "run.yaml";

/// Highest run number tried before giving up
const MAX_RUNS: usize = 9999;

/// Workdir root from the command line, the environment or the default
pub fn workdir_root(cli: Option<&Path>) -> PathBuf {
    if let Some(root) = cli {
        return root.to_path_buf();
    }
    match std::env::var(WORKDIR_ROOT_ENV) {
        Ok(root) if !root.is_empty() => PathBuf::from(root),
        _ => PathBuf::from(DEFAULT_WORKDIR_ROOT),
    }
}

pub fn run_id(number: usize) -> String {
    format!("run-{:03}", number)
}

/// Allocate the first free `run-NNN` directory under the root
///
/// Creation is atomic so concurrent invocations never share a run. In dry
/// mode the first free name is returned and nothing is created.
pub fn allocate_run(root: &Path, dry: bool) -> Result<(String, PathBuf)> {
    if !dry {
        std::fs::create_dir_all(root)
            .wrap_err(ErrorKind::General, || format!("Failed to create '{}'.", root.display()))?;
    }
    for number in 1..=MAX_RUNS {
        let id = run_id(number);
        let path = root.join(&id);
        if dry {
            if !path.exists() {
                return Ok((id, path));
            }
            continue;
        }
        match std::fs::create_dir(&path) {
            Ok(()) => {
                debug!(run = %id, path = %path.display(), "Run workdir allocated");
                return Ok((id, path));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(Error::general(format!("Failed to create '{}'.", path.display())).with_source(e))
            }
        }
    }
    Err(Error::general(format!(
        "No free run directory left under '{}'.",
        root.display()
    )))
}

/// Directory of an existing run given by id or by path
pub fn resolve_run(root: &Path, id: &str) -> (String, PathBuf) {
    let given = Path::new(id);
    if given.is_absolute() {
        let name = given
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        (name, given.to_path_buf())
    } else {
        (id.to_string(), root.join(id))
    }
}

/// What a run was started with, kept for resuming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub plans_file: Option<PathBuf>,
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn load(run_workdir: &Path) -> Result<Option<Self>> {
        let path = run_workdir.join(RUN_RECORD_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        read_yaml(&path).map(Some)
    }

    pub fn save(&self, run_workdir: &Path) -> Result<()> {
        write_yaml(&run_workdir.join(RUN_RECORD_FILENAME), self)
    }
}

/// Write a value as yaml, creating parent directories
pub fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err(ErrorKind::General, || format!("Failed to create '{}'.", parent.display()))?;
    }
    let content = serde_yaml::to_string(value)?;
    std::fs::write(path, content)
        .wrap_err(ErrorKind::General, || format!("Failed to write '{}'.", path.display()))
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .wrap_err(ErrorKind::General, || format!("Failed to read '{}'.", path.display()))?;
    serde_yaml::from_str(&content)
        .wrap_err(ErrorKind::General, || format!("Corrupted file '{}'.", path.display()))
}

/// Read a yaml list, a missing file is an empty list
pub fn read_yaml_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_yaml(path)
}
