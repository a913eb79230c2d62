//! Guest running in a podman container

use crate::guest::process::{run_process, shell_quote, ProcessOptions};
use crate::guest::{CommandOutput, Guest, GuestData, GuestError, TransferOptions};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub const DEFAULT_IMAGE: &str = "fedora:latest";

/// Container started from an image and kept alive with `sleep infinity`
#[derive(Debug, Clone)]
pub struct ContainerGuest {
    data: GuestData,
}

impl ContainerGuest {
    /// Assigns a container name when the data has none
    pub fn new(mut data: GuestData) -> Self {
        if data.container.is_none() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            data.container = Some(format!("testcraft-{}", &id[..8]));
        }
        Self { data }
    }

    pub fn container(&self) -> &str {
        self.data.container.as_deref().unwrap_or_default()
    }

    pub fn image(&self) -> &str {
        self.data.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    async fn podman(&self, args: Vec<String>) -> Result<CommandOutput, GuestError> {
        run_process("podman", &args, &ProcessOptions::new()).await
    }
}

/// Arguments of `podman run` starting the container
pub fn run_args(container: &str, image: &str) -> Vec<String> {
    [
        "run", "-d", "--name", container, "--entrypoint", "sleep", image, "infinity",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Arguments of `podman exec` running a shell command
pub fn exec_args(container: &str, command: &str, options: &ProcessOptions) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(cwd) = &options.cwd {
        args.push("-w".to_string());
        args.push(cwd.to_string_lossy().into_owned());
    }
    for (key, value) in &options.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(container.to_string());
    args.extend(["sh".to_string(), "-c".to_string(), command.to_string()]);
    args
}

fn mkdir_command(dir: &Path) -> String {
    format!("mkdir -p {}", shell_quote(&dir.to_string_lossy()))
}

fn chmod_command(mode: u32, path: &Path) -> String {
    format!("chmod {:o} {}", mode, shell_quote(&path.to_string_lossy()))
}

#[async_trait]
impl Guest for ContainerGuest {
    fn data(&self) -> &GuestData {
        &self.data
    }

    async fn start(&self) -> Result<(), GuestError> {
        info!(container = %self.container(), image = %self.image(), "Starting container");
        self.podman(run_args(self.container(), self.image())).await.map(|_| ())
    }

    async fn run(&self, command: &str, options: &ProcessOptions) -> Result<CommandOutput, GuestError> {
        let args = exec_args(self.container(), command, options);
        run_process("podman", &args, &ProcessOptions::new().with_timeout(options.timeout)).await
    }

    async fn push(
        &self,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<(), GuestError> {
        if let Some(parent) = destination.parent() {
            self.run(&mkdir_command(parent), &ProcessOptions::new()).await?;
        }
        let mut from = source.to_string_lossy().into_owned();
        if source.is_dir() {
            // copy the content, not the directory itself
            from.push_str("/.");
        }
        self.podman(vec![
            "cp".to_string(),
            from,
            format!("{}:{}", self.container(), destination.display()),
        ])
        .await?;
        if let Some(mode) = options.chmod {
            self.run(&chmod_command(mode, destination), &ProcessOptions::new())
                .await?;
        }
        Ok(())
    }

    async fn pull(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuestError::io(format!("Failed to create '{}'", parent.display()), e))?;
        }
        self.podman(vec![
            "cp".to_string(),
            format!("{}:{}", self.container(), source.display()),
            destination.to_string_lossy().into_owned(),
        ])
        .await
        .map(|_| ())
    }

    async fn reboot(&self) -> Result<(), GuestError> {
        self.podman(vec!["restart".to_string(), self.container().to_string()])
            .await
            .map(|_| ())
    }

    async fn stop(&self) -> Result<(), GuestError> {
        self.podman(vec!["stop".to_string(), self.container().to_string()])
            .await
            .map(|_| ())
    }

    async fn remove(&self) -> Result<(), GuestError> {
        self.podman(vec![
            "rm".to_string(),
            "-f".to_string(),
            self.container().to_string(),
        ])
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_container_name_assigned() {
        let guest = ContainerGuest::new(GuestData {
            name: "default-0".to_string(),
            how: "container".to_string(),
            ..Default::default()
        });
        assert!(guest.container().starts_with("testcraft-"));
        assert_eq!(guest.container().len(), "testcraft-".len() + 8);
        assert_eq!(guest.image(), DEFAULT_IMAGE);
    }

    #[test]
    fn test_exec_args() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        let options = ProcessOptions::new().with_cwd("/tmp").with_env(env);
        let args = exec_args("box", "echo $A", &options);
        assert_eq!(
            args,
            vec!["exec", "-w", "/tmp", "-e", "A=1", "box", "sh", "-c", "echo $A"]
        );
    }

    #[test]
    fn test_transfer_commands_quote_paths() {
        assert_eq!(mkdir_command(Path::new("/var/tmp/run-001")), "mkdir -p /var/tmp/run-001");
        assert_eq!(
            mkdir_command(Path::new("/tmp/it's here")),
            r"mkdir -p '/tmp/it'\''s here'"
        );
        assert_eq!(chmod_command(0o755, Path::new("/tmp/a b.sh")), "chmod 755 '/tmp/a b.sh'");
    }

    #[test]
    fn test_run_args() {
        let args = run_args("box", "centos:stream9");
        assert_eq!(args.last().map(String::as_str), Some("infinity"));
        assert!(args.contains(&"centos:stream9".to_string()));
    }

    #[tokio::test]
    #[ignore] // Requires podman
    async fn test_container_lifecycle() {
        let guest = ContainerGuest::new(GuestData {
            name: "default-0".to_string(),
            how: "container".to_string(),
            ..Default::default()
        });
        guest.start().await.unwrap();
        let output = guest.run("echo hello", &ProcessOptions::new()).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        guest.stop().await.unwrap();
        guest.remove().await.unwrap();
    }
}
