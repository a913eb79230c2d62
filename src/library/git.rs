//! Git based remote fetcher

use crate::core::error::Result;
use crate::guest::process::{run_process, ProcessOptions};
use crate::library::RemoteFetcher;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Clones repositories with the `git` binary
#[derive(Debug, Clone)]
pub struct GitFetcher {
    timeout: Duration,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
        }
    }
}

impl GitFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RemoteFetcher for GitFetcher {
    async fn fetch(&self, url: &str, reference: Option<&str>, destination: &Path) -> Result<()> {
        let options = ProcessOptions::new().with_timeout(Some(self.timeout));
        let destination_text = destination.to_string_lossy().into_owned();

        // a previous failed attempt may have left a partial clone behind
        if destination.exists() {
            std::fs::remove_dir_all(destination)?;
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let clone = vec!["clone".to_string(), url.to_string(), destination_text.clone()];
        run_process("git", &clone, &options)
            .await
            .map_err(|e| e.into_run_error(format!("Failed to clone '{}'.", url)))?;

        if let Some(reference) = reference {
            let checkout = vec![
                "-C".to_string(),
                destination_text,
                "checkout".to_string(),
                reference.to_string(),
            ];
            run_process("git", &checkout, &options)
                .await
                .map_err(|e| e.into_run_error(format!("Failed to check out '{}' in '{}'.", reference, url)))?;
        }

        debug!(url = %url, destination = %destination.display(), "Repository fetched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[tokio::test]
    #[ignore] // Requires git
    async fn test_clone_failure_is_run_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitFetcher::new(Duration::from_secs(30))
            .fetch("/nonexistent/repository", None, &dir.path().join("copy"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Run);
        assert!(!err.is_library_not_found());
    }
}
