//! Guest reached over ssh, files transferred with rsync

use crate::guest::process::{run_process, shell_quote, ProcessOptions};
use crate::guest::{CommandOutput, Guest, GuestData, GuestError, TransferOptions};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_USER: &str = "root";
const REBOOT_TIMEOUT: Duration = Duration::from_secs(600);
const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pre-existing machine reachable through ssh
#[derive(Debug, Clone)]
pub struct ConnectGuest {
    data: GuestData,
}

impl ConnectGuest {
    pub fn new(data: GuestData) -> Self {
        Self { data }
    }

    fn hostname(&self) -> Result<&str, GuestError> {
        self.data
            .hostname
            .as_deref()
            .ok_or_else(|| GuestError::Unsupported(format!("guest '{}' has no hostname", self.data.name)))
    }

    async fn wait_until_reachable(&self) -> Result<(), GuestError> {
        let started = Instant::now();
        loop {
            tokio::time::sleep(REBOOT_POLL_INTERVAL).await;
            match self.run("whoami", &ProcessOptions::new()).await {
                Ok(_) => return Ok(()),
                Err(err) if started.elapsed() < REBOOT_TIMEOUT => {
                    debug!(guest = %self.data.name, error = %err, "Guest not reachable yet");
                }
                Err(_) => {
                    return Err(GuestError::Timeout {
                        command: "reboot".to_string(),
                        seconds: REBOOT_TIMEOUT.as_secs(),
                    })
                }
            }
        }
    }
}

/// `user@host` for ssh and rsync
pub fn ssh_destination(data: &GuestData, hostname: &str) -> String {
    format!("{}@{}", data.user.as_deref().unwrap_or(DEFAULT_USER), hostname)
}

/// Options shared by every ssh invocation
pub fn ssh_options(data: &GuestData) -> Vec<String> {
    let mut options = vec![
        "-oStrictHostKeyChecking=no".to_string(),
        "-oUserKnownHostsFile=/dev/null".to_string(),
        "-oLogLevel=ERROR".to_string(),
    ];
    if let Some(port) = data.port {
        options.push(format!("-p{}", port));
    }
    if let Some(key) = &data.key {
        options.push(format!("-i{}", key.display()));
    }
    options
}

/// Remote command line with working directory and environment applied
pub fn remote_command(command: &str, options: &ProcessOptions) -> String {
    let mut parts = Vec::new();
    if let Some(cwd) = &options.cwd {
        parts.push(format!("cd {}", shell_quote(&cwd.to_string_lossy())));
    }
    if !options.env.is_empty() {
        let exports = options
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, shell_quote(value)))
            .collect::<Vec<_>>()
            .join(" ");
        parts.push(format!("export {}", exports));
    }
    parts.push(command.to_string());
    parts.join(" && ")
}

/// Arguments of `ssh` running `command` on the guest
pub fn ssh_args(data: &GuestData, hostname: &str, command: &str, options: &ProcessOptions) -> Vec<String> {
    let mut args = ssh_options(data);
    args.push(ssh_destination(data, hostname));
    args.push(remote_command(command, options));
    args
}

/// Arguments of `rsync` copying `source` to `destination`
///
/// Directories get a trailing slash so their content lands in the
/// destination directory itself.
pub fn rsync_args(data: &GuestData, source: &str, destination: &str, source_is_dir: bool, chmod: Option<u32>) -> Vec<String> {
    let mut args = vec!["-s".to_string(), "-r".to_string(), "-z".to_string(), "--checksum".to_string()];
    if let Some(mode) = chmod {
        args.push(format!("--chmod={:o}", mode));
    } else {
        args.push("-p".to_string());
    }
    args.push("-e".to_string());
    let mut ssh = vec!["ssh".to_string()];
    ssh.extend(ssh_options(data));
    args.push(ssh.join(" "));

    let source = if source_is_dir && !source.ends_with('/') {
        format!("{}/", source)
    } else {
        source.to_string()
    };
    args.push(source);
    args.push(destination.to_string());
    args
}

#[async_trait]
impl Guest for ConnectGuest {
    fn data(&self) -> &GuestData {
        &self.data
    }

    async fn run(&self, command: &str, options: &ProcessOptions) -> Result<CommandOutput, GuestError> {
        let hostname = self.hostname()?;
        let args = ssh_args(&self.data, hostname, command, options);
        let local = ProcessOptions::new().with_timeout(options.timeout);
        run_process("ssh", &args, &local).await
    }

    async fn push(
        &self,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<(), GuestError> {
        let hostname = self.hostname()?;
        let remote = format!("{}:{}", ssh_destination(&self.data, hostname), destination.display());
        if let Some(parent) = destination.parent() {
            self.run(&format!("mkdir -p {}", shell_quote(&parent.to_string_lossy())), &ProcessOptions::new())
                .await?;
        }
        let args = rsync_args(
            &self.data,
            &source.to_string_lossy(),
            &remote,
            source.is_dir(),
            options.chmod,
        );
        run_process("rsync", &args, &ProcessOptions::new()).await.map(|_| ())
    }

    async fn pull(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        let hostname = self.hostname()?;
        let remote = format!("{}:{}", ssh_destination(&self.data, hostname), source.display());
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuestError::io(format!("Failed to create '{}'", parent.display()), e))?;
        }
        // the remote side may be a directory, rsync sorts that out with a trailing slash
        let args = rsync_args(&self.data, &remote, &destination.to_string_lossy(), false, None);
        run_process("rsync", &args, &ProcessOptions::new()).await.map(|_| ())
    }

    async fn reboot(&self) -> Result<(), GuestError> {
        info!(guest = %self.data.name, "Issuing reboot over ssh");
        // the connection usually drops before the command returns
        let _ = self.run("shutdown -r now", &ProcessOptions::new()).await;
        self.wait_until_reachable().await
    }
}
