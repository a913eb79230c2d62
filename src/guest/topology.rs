//! Guest topology published to guests before test content runs

use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use crate::core::names::joined_name;
use crate::core::step::StepKind;
use crate::guest::process::shell_quote;
use crate::guest::{GuestFacts, GuestHandle, TransferOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOPOLOGY_FILENAME_BASE: &str = "testcraft-topology";
pub const TOPOLOGY_YAML_ENV: &str = "TESTCRAFT_TOPOLOGY_YAML";
pub const TOPOLOGY_BASH_ENV: &str = "TESTCRAFT_TOPOLOGY_BASH";

/// What a guest knows about one guest of the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestTopology {
    pub name: String,
    pub role: Option<String>,
    pub hostname: Option<String>,
    pub facts: GuestFacts,
}

impl GuestTopology {
    pub async fn from_guest(guest: &GuestHandle) -> Result<Self> {
        Ok(Self {
            name: guest.name().to_string(),
            role: guest.role().map(str::to_string),
            hostname: guest.data().hostname.clone(),
            facts: guest.facts().await?,
        })
    }
}

/// Snapshot of every guest in a plan, seen from one of them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Topology {
    /// The guest the topology is published to
    pub guest: GuestTopology,
    pub guest_names: Vec<String>,
    pub guests: BTreeMap<String, GuestTopology>,
    pub role_names: Vec<String>,
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Topology {
    /// Describe `all` guests from the point of view of `current`
    pub async fn new(current: &GuestHandle, all: &[GuestHandle]) -> Result<Self> {
        let mut guests = BTreeMap::new();
        let mut guest_names = Vec::new();
        let mut roles: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for guest in all {
            let entry = GuestTopology::from_guest(guest).await?;
            if let Some(role) = &entry.role {
                roles.entry(role.clone()).or_default().push(entry.name.clone());
            }
            guest_names.push(entry.name.clone());
            guests.insert(entry.name.clone(), entry);
        }

        Ok(Self {
            guest: GuestTopology::from_guest(current).await?,
            guest_names,
            guests,
            role_names: roles.keys().cloned().collect(),
            roles,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).wrap_err(ErrorKind::General, || "Failed to serialize topology.")
    }

    /// Bash snippet declaring the topology as shell variables
    pub fn to_bash(&self) -> String {
        let mut out = String::new();
        let quote = |value: &Option<String>| shell_quote(value.as_deref().unwrap_or_default());

        let _ = writeln!(out, "declare -A TESTCRAFT_GUEST");
        let _ = writeln!(out, "TESTCRAFT_GUEST[name]={}", shell_quote(&self.guest.name));
        let _ = writeln!(out, "TESTCRAFT_GUEST[role]={}", quote(&self.guest.role));
        let _ = writeln!(out, "TESTCRAFT_GUEST[hostname]={}", quote(&self.guest.hostname));

        let _ = writeln!(out, "TESTCRAFT_GUEST_NAMES={}", shell_quote(&self.guest_names.join(" ")));
        let _ = writeln!(out, "declare -A TESTCRAFT_GUESTS");
        for guest in self.guests.values() {
            let key = |field: &str| shell_quote(&format!("{}.{}", guest.name, field));
            let _ = writeln!(out, "TESTCRAFT_GUESTS[{}]={}", key("name"), shell_quote(&guest.name));
            let _ = writeln!(out, "TESTCRAFT_GUESTS[{}]={}", key("role"), quote(&guest.role));
            let _ = writeln!(out, "TESTCRAFT_GUESTS[{}]={}", key("hostname"), quote(&guest.hostname));
        }

        let _ = writeln!(out, "TESTCRAFT_ROLE_NAMES={}", shell_quote(&self.role_names.join(" ")));
        let _ = writeln!(out, "declare -A TESTCRAFT_ROLES");
        for (role, names) in &self.roles {
            let _ = writeln!(out, "TESTCRAFT_ROLES[{}]={}", shell_quote(role), shell_quote(&names.join(" ")));
        }
        out
    }
}

/// Topology file paths for one (step, phase, guest) triple
pub fn topology_paths(
    dir: &Path,
    step: StepKind,
    phase_safe_name: &str,
    guest_safe_name: &str,
) -> (PathBuf, PathBuf) {
    let base = joined_name(TOPOLOGY_FILENAME_BASE, &[step.as_str(), phase_safe_name, guest_safe_name]);
    (dir.join(format!("{}.yaml", base)), dir.join(format!("{}.sh", base)))
}

/// Write the topology next to the plan data and push it to the guest
///
/// Returns the environment variables pointing at the published files. In
/// dry mode the topology is computed but neither written nor pushed, and
/// no variables are returned.
pub async fn publish(
    guest: &GuestHandle,
    all: &[GuestHandle],
    dir: &Path,
    step: StepKind,
    phase_safe_name: &str,
) -> Result<BTreeMap<String, String>> {
    let topology = Topology::new(guest, all).await?;
    let yaml = topology.to_yaml()?;
    let bash = topology.to_bash();
    let (yaml_path, bash_path) = topology_paths(dir, step, phase_safe_name, &guest.safe_name());

    if guest.is_dry() {
        debug!(guest = %guest.name(), path = %yaml_path.display(), "Would publish topology (dry)");
        return Ok(BTreeMap::new());
    }

    std::fs::create_dir_all(dir)
        .wrap_err(ErrorKind::General, || format!("Failed to create '{}'.", dir.display()))?;
    for (path, content) in [(&yaml_path, &yaml), (&bash_path, &bash)] {
        std::fs::write(path, content)
            .wrap_err(ErrorKind::General, || format!("Failed to write '{}'.", path.display()))?;
        guest
            .push(path, None, &TransferOptions::default())
            .await
            .map_err(|e| e.wrap(ErrorKind::Run, format!("Failed to publish topology to guest '{}'.", guest.name())))?;
    }
    debug!(guest = %guest.name(), path = %yaml_path.display(), "Topology published");

    let mut env = BTreeMap::new();
    env.insert(TOPOLOGY_YAML_ENV.to_string(), path_string(&yaml_path)?);
    env.insert(TOPOLOGY_BASH_ENV.to_string(), path_string(&bash_path)?);
    Ok(env)
}

fn path_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::general(format!("Path '{}' is not valid UTF-8.", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::local::LocalGuest;
    use crate::guest::GuestData;
    use std::sync::Arc;

    fn handle(name: &str, role: Option<&str>, dry: bool) -> GuestHandle {
        let data = GuestData {
            name: name.to_string(),
            how: "local".to_string(),
            role: role.map(str::to_string),
            facts: Some(GuestFacts::default()),
            ..Default::default()
        };
        GuestHandle::new(Arc::new(LocalGuest::new(data)), dry)
    }

    #[tokio::test]
    async fn test_topology_groups_roles() {
        let guests = vec![
            handle("client-1", Some("client"), false),
            handle("client-2", Some("client"), false),
            handle("server", Some("server"), false),
        ];
        let topology = Topology::new(&guests[2], &guests).await.unwrap();

        assert_eq!(topology.guest.name, "server");
        assert_eq!(topology.guest_names, vec!["client-1", "client-2", "server"]);
        assert_eq!(topology.role_names, vec!["client", "server"]);
        assert_eq!(topology.roles["client"], vec!["client-1", "client-2"]);

        let yaml = topology.to_yaml().unwrap();
        assert!(yaml.contains("guest-names:"));
        let bash = topology.to_bash();
        assert!(bash.contains("TESTCRAFT_GUEST[name]=server"));
        assert!(bash.contains("TESTCRAFT_ROLES[client]='client-1 client-2'"));
    }

    #[test]
    fn test_paths_unique_per_step_phase_and_guest() {
        let dir = Path::new("/plan");
        let a = topology_paths(dir, StepKind::Prepare, "default-0", "client");
        let b = topology_paths(dir, StepKind::Prepare, "default-1", "client");
        let c = topology_paths(dir, StepKind::Prepare, "default-0", "server");
        let d = topology_paths(dir, StepKind::Execute, "default-0", "client");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.0, PathBuf::from("/plan/testcraft-topology@prepare@default-0@client.yaml"));

        // dashes inside names cannot shift the boundaries
        let e = topology_paths(dir, StepKind::Prepare, "a-b", "c");
        let f = topology_paths(dir, StepKind::Prepare, "a", "b-c");
        assert_ne!(e, f);
    }

    #[tokio::test]
    async fn test_bash_keys_quoted() {
        let guests = vec![handle("web 1]", Some("front end"), false)];
        let topology = Topology::new(&guests[0], &guests).await.unwrap();
        let bash = topology.to_bash();
        assert!(bash.contains("TESTCRAFT_GUESTS['web 1].name']='web 1]'"), "{}", bash);
        assert!(bash.contains("TESTCRAFT_ROLES['front end']='web 1]'"), "{}", bash);

        let script = format!("{}\necho \"${{TESTCRAFT_GUESTS['web 1].role']}}\"\n", bash);
        let output = std::process::Command::new("bash").arg("-c").arg(&script).output().unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "front end");
    }

    #[tokio::test]
    async fn test_publish_writes_and_returns_env() {
        let dir = tempfile::tempdir().unwrap();
        let guest = handle("default-0", None, false);
        let env = publish(&guest, std::slice::from_ref(&guest), dir.path(), StepKind::Prepare, "setup")
            .await
            .unwrap();

        let yaml_path = PathBuf::from(&env[TOPOLOGY_YAML_ENV]);
        assert!(yaml_path.exists());
        assert!(PathBuf::from(&env[TOPOLOGY_BASH_ENV]).exists());
    }

    #[tokio::test]
    async fn test_publish_dry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let guest = handle("default-0", None, true);
        let env = publish(&guest, std::slice::from_ref(&guest), dir.path(), StepKind::Prepare, "setup")
            .await
            .unwrap();
        assert!(env.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
