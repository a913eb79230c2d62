//! Guest transport
//!
//! A [`Guest`] is a provisioned test target reachable through some
//! transport. Phases never talk to a `Guest` directly: they go through a
//! [`GuestHandle`], which gates every effectful call on dry mode, applies
//! privilege escalation and collects facts lazily.

pub mod connect;
pub mod container;
pub mod error;
pub mod local;
pub mod process;
pub mod topology;

pub use error::GuestError;
pub use process::ProcessOptions;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::names::safe_name;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// File holding provisioned guests inside the provision step workdir
pub const GUESTS_FILENAME: &str = "guests.yaml";

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Options of a push
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Permission bits applied to the pushed content, e.g. `0o755`
    pub chmod: Option<u32>,
}

/// Facts about a guest, collected on first need
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestFacts {
    #[serde(default)]
    pub is_superuser: Option<bool>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub kernel_release: Option<String>,
}

impl GuestFacts {
    /// Pull `PRETTY_NAME` out of an os-release file
    pub fn distro_from_os_release(content: &str) -> Option<String> {
        content
            .lines()
            .find_map(|line| line.strip_prefix("PRETTY_NAME="))
            .map(|value| value.trim().trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Persistent description of a provisioned guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestData {
    pub name: String,

    /// Provision method which created the guest
    pub how: String,

    #[serde(default)]
    pub role: Option<String>,

    /// Escalate commands with sudo unless already a superuser
    #[serde(default, rename = "become")]
    pub become_root: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Name of the running container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts: Option<GuestFacts>,
}

/// Uniform transport contract every guest kind implements
///
/// Implementations perform the operation unconditionally; dry mode and
/// escalation are handled by [`GuestHandle`].
#[async_trait]
pub trait Guest: Send + Sync + fmt::Debug {
    fn data(&self) -> &GuestData;

    /// Bring the guest up
    async fn start(&self) -> std::result::Result<(), GuestError> {
        Ok(())
    }

    /// Run a shell command, failing on non-zero exit
    async fn run(
        &self,
        command: &str,
        options: &ProcessOptions,
    ) -> std::result::Result<CommandOutput, GuestError>;

    /// Copy a local file or directory tree onto the guest
    async fn push(
        &self,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
    ) -> std::result::Result<(), GuestError>;

    /// Copy a file or directory tree from the guest
    async fn pull(&self, source: &Path, destination: &Path) -> std::result::Result<(), GuestError>;

    async fn reboot(&self) -> std::result::Result<(), GuestError>;

    async fn stop(&self) -> std::result::Result<(), GuestError> {
        Ok(())
    }

    async fn remove(&self) -> std::result::Result<(), GuestError> {
        Ok(())
    }
}

/// Shared handle to a provisioned guest
#[derive(Clone)]
pub struct GuestHandle {
    guest: Arc<dyn Guest>,
    facts: Arc<OnceCell<GuestFacts>>,
    dry: bool,
}

impl fmt::Debug for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestHandle")
            .field("name", &self.name())
            .field("how", &self.data().how)
            .field("dry", &self.dry)
            .finish()
    }
}

impl GuestHandle {
    pub fn new(guest: Arc<dyn Guest>, dry: bool) -> Self {
        let facts = match guest.data().facts.clone() {
            Some(known) => OnceCell::new_with(Some(known)),
            None => OnceCell::new(),
        };
        Self {
            guest,
            facts: Arc::new(facts),
            dry,
        }
    }

    /// Same guest and facts, with another dry flag
    pub fn with_dry(&self, dry: bool) -> Self {
        Self {
            guest: self.guest.clone(),
            facts: self.facts.clone(),
            dry,
        }
    }

    pub fn data(&self) -> &GuestData {
        self.guest.data()
    }

    pub fn name(&self) -> &str {
        &self.guest.data().name
    }

    pub fn role(&self) -> Option<&str> {
        self.guest.data().role.as_deref()
    }

    pub fn safe_name(&self) -> String {
        safe_name(self.name())
    }

    pub fn is_dry(&self) -> bool {
        self.dry
    }

    /// Guest data including any facts collected so far
    pub fn snapshot(&self) -> GuestData {
        let mut data = self.guest.data().clone();
        if let Some(facts) = self.facts.get() {
            data.facts = Some(facts.clone());
        }
        data
    }

    /// Facts about the guest, collected on first call
    ///
    /// In dry mode nothing is run and only already known facts are returned.
    pub async fn facts(&self) -> Result<GuestFacts> {
        if self.dry {
            return Ok(self.facts.get().cloned().unwrap_or_default());
        }
        let facts = self
            .facts
            .get_or_try_init(|| async { self.collect_facts().await })
            .await?;
        Ok(facts.clone())
    }

    async fn collect_facts(&self) -> Result<GuestFacts> {
        debug!(guest = %self.name(), "Collecting guest facts");
        let uid = self
            .guest
            .run("id -u", &ProcessOptions::new())
            .await
            .map_err(|e| e.into_run_error(format!("Failed to check the user of guest '{}'.", self.name())))?;

        // the remaining facts are informational only
        let query = |command: &'static str| async move {
            match self.guest.run(command, &ProcessOptions::new()).await {
                Ok(output) => Some(output.stdout.trim().to_string()).filter(|value| !value.is_empty()),
                Err(err) => {
                    debug!(guest = %self.name(), command = %command, "Fact query failed: {}", err);
                    None
                }
            }
        };

        let uid = uid.stdout.trim();
        let facts = GuestFacts {
            is_superuser: (!uid.is_empty()).then(|| uid == "0"),
            arch: query("uname -m").await,
            kernel_release: query("uname -r").await,
            distro: query("cat /etc/os-release")
                .await
                .and_then(|content| GuestFacts::distro_from_os_release(&content)),
        };
        debug!(guest = %self.name(), facts = ?facts, "Guest facts collected");
        Ok(facts)
    }

    /// Command prefixed with `sudo -E` when escalation is needed
    pub async fn escalate(&self, command: &str) -> Result<String> {
        if !self.data().become_root {
            return Ok(command.to_string());
        }
        let facts = self.facts().await?;
        if facts.is_superuser.unwrap_or(false) {
            Ok(command.to_string())
        } else {
            Ok(format!("sudo -E {}", command))
        }
    }

    /// Run a command on the guest
    ///
    /// Non-zero exit is a run error carrying the [`GuestError`] as source.
    pub async fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let command = self.escalate(command).await?;
        if self.dry {
            info!(guest = %self.name(), command = %command, "Would run command (dry)");
            return Ok(CommandOutput::default());
        }

        let mut options = ProcessOptions::new()
            .with_env(env.clone())
            .with_timeout(timeout);
        options.cwd = cwd.map(Path::to_path_buf);
        self.guest.run(&command, &options).await.map_err(|e| {
            e.into_run_error(format!("Failed to run '{}' on guest '{}'.", command, self.name()))
        })
    }

    /// Push a path to the guest, to the same location unless given
    pub async fn push(
        &self,
        source: &Path,
        destination: Option<&Path>,
        options: &TransferOptions,
    ) -> Result<()> {
        let destination = destination.unwrap_or(source);
        if self.dry {
            debug!(guest = %self.name(), source = %source.display(), "Would push (dry)");
            return Ok(());
        }
        self.guest
            .push(source, destination, options)
            .await
            .map_err(|e| {
                e.into_run_error(format!(
                    "Failed to push '{}' to guest '{}'.",
                    source.display(),
                    self.name()
                ))
            })
    }

    /// Pull a path from the guest, to the same location unless given
    pub async fn pull(&self, source: &Path, destination: Option<&Path>) -> Result<()> {
        let destination = destination.unwrap_or(source);
        if self.dry {
            debug!(guest = %self.name(), source = %source.display(), "Would pull (dry)");
            return Ok(());
        }
        self.guest.pull(source, destination).await.map_err(|e| {
            e.into_run_error(format!(
                "Failed to pull '{}' from guest '{}'.",
                source.display(),
                self.name()
            ))
        })
    }

    pub async fn reboot(&self) -> Result<()> {
        if self.dry {
            info!(guest = %self.name(), "Would reboot (dry)");
            return Ok(());
        }
        info!(guest = %self.name(), "Rebooting guest");
        self.guest
            .reboot()
            .await
            .map_err(|e| e.into_run_error(format!("Failed to reboot guest '{}'.", self.name())))
    }

    pub async fn start(&self) -> Result<()> {
        if self.dry {
            return Ok(());
        }
        self.guest.start().await.map_err(|e| {
            Error::new(ErrorKind::Provision, format!("Failed to start guest '{}'.", self.name()))
                .with_source(e)
        })
    }

    /// Stop and remove the guest
    pub async fn stop_and_remove(&self) -> Result<()> {
        if self.dry {
            return Ok(());
        }
        let name = self.name().to_string();
        self.guest.stop().await.map_err(|e| {
            Error::new(ErrorKind::Finish, format!("Failed to stop guest '{}'.", name)).with_source(e)
        })?;
        self.guest.remove().await.map_err(|e| {
            Error::new(ErrorKind::Finish, format!("Failed to remove guest '{}'.", name)).with_source(e)
        })
    }
}
