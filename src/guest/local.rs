//! Guest running directly on the local host

use crate::guest::process::{run_process, ProcessOptions};
use crate::guest::{CommandOutput, Guest, GuestData, GuestError, TransferOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Commands run through `sh -c` on this host, files are plain copies
#[derive(Debug, Clone)]
pub struct LocalGuest {
    data: GuestData,
}

impl LocalGuest {
    pub fn new(data: GuestData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Guest for LocalGuest {
    fn data(&self) -> &GuestData {
        &self.data
    }

    async fn run(&self, command: &str, options: &ProcessOptions) -> Result<CommandOutput, GuestError> {
        let args = vec!["-c".to_string(), command.to_string()];
        run_process("sh", &args, options).await
    }

    async fn push(
        &self,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<(), GuestError> {
        sync(source.to_path_buf(), destination.to_path_buf(), options.chmod).await
    }

    async fn pull(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        sync(source.to_path_buf(), destination.to_path_buf(), None).await
    }

    async fn reboot(&self) -> Result<(), GuestError> {
        Err(GuestError::Unsupported(
            "the local guest cannot be rebooted".to_string(),
        ))
    }
}

async fn sync(source: PathBuf, destination: PathBuf, chmod: Option<u32>) -> Result<(), GuestError> {
    tokio::task::spawn_blocking(move || sync_path(&source, &destination, chmod))
        .await
        .map_err(|e| GuestError::io("Copy task failed", std::io::Error::other(e)))?
}

/// Make `destination` hold the same content as `source`
///
/// Files whose content already matches are left alone, so repeated syncs
/// of unchanged content change nothing. Syncing a path onto itself is a
/// no-op.
pub fn sync_path(source: &Path, destination: &Path, chmod: Option<u32>) -> Result<(), GuestError> {
    if source == destination {
        return match chmod {
            Some(mode) => set_mode(destination, mode),
            None => Ok(()),
        };
    }

    if source.is_dir() {
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|e| {
                GuestError::io(
                    format!("Failed to walk '{}'", source.display()),
                    std::io::Error::other(e),
                )
            })?;
            let relative = match entry.path().strip_prefix(source) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)
                    .map_err(|e| GuestError::io(format!("Failed to create '{}'", target.display()), e))?;
            } else {
                copy_if_changed(entry.path(), &target)?;
            }
        }
    } else {
        copy_if_changed(source, destination)?;
    }

    match chmod {
        Some(mode) => set_mode(destination, mode),
        None => Ok(()),
    }
}

fn copy_if_changed(source: &Path, destination: &Path) -> Result<(), GuestError> {
    let content = std::fs::read(source)
        .map_err(|e| GuestError::io(format!("Failed to read '{}'", source.display()), e))?;
    if let Ok(existing) = std::fs::read(destination) {
        if existing == content {
            return Ok(());
        }
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GuestError::io(format!("Failed to create '{}'", parent.display()), e))?;
    }
    std::fs::write(destination, content)
        .map_err(|e| GuestError::io(format!("Failed to write '{}'", destination.display()), e))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), GuestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| GuestError::io(format!("Failed to chmod '{}'", path.display()), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), GuestError> {
    Ok(())
}
