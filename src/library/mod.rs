//! Library fetch cache
//!
//! Tests may require files living elsewhere: in a git repository or in a
//! local directory. A [`LibraryCache`] belongs to the run and is shared by
//! every phase of every plan, so each remote source is fetched at most once
//! per run no matter how many tests require it.

pub mod file;
pub mod git;

pub use git::GitFetcher;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::names::safe_name;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

/// Reference to externally sourced files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryIdentifier {
    /// Git repository holding the files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Local directory holding the files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Branch, tag or commit to check out
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Patterns selecting the files, the whole source when empty
    #[serde(default, deserialize_with = "one_or_many")]
    pub pattern: Vec<String>,

    /// Directory relative to the test directory to copy the files into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,

    /// A missing match is only a warning
    #[serde(default)]
    pub optional: bool,
}

impl LibraryIdentifier {
    /// Where the files come from, the cache key
    pub fn source(&self) -> Result<LibrarySource> {
        match (&self.url, &self.path) {
            (Some(url), _) => Ok(LibrarySource::Git {
                url: url.clone(),
                reference: self.reference.clone(),
            }),
            (None, Some(path)) => Ok(LibrarySource::Path(path.clone())),
            (None, None) => Err(Error::specification(
                "Library requires either 'url' or 'path'.",
            )),
        }
    }

    pub fn patterns(&self) -> Vec<String> {
        if self.pattern.is_empty() {
            vec![file::WHOLE_DIRECTORY.to_string()]
        } else {
            self.pattern.clone()
        }
    }
}

/// Source location of a library
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LibrarySource {
    Git { url: String, reference: Option<String> },
    Path(PathBuf),
}

impl LibrarySource {
    /// Directory name of the working copy inside the cache root
    pub fn cache_key(&self) -> String {
        match self {
            LibrarySource::Git { url, reference } => format!(
                "{}-{}",
                safe_name(url),
                safe_name(reference.as_deref().unwrap_or("default"))
            ),
            LibrarySource::Path(path) => safe_name(&path.to_string_lossy()),
        }
    }
}

/// Fetches a remote repository into a local directory
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str, reference: Option<&str>, destination: &Path) -> Result<()>;
}

/// Run-wide cache of library working copies
pub struct LibraryCache {
    root: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
    entries: Mutex<HashMap<LibrarySource, Arc<OnceCell<PathBuf>>>>,
}

impl std::fmt::Debug for LibraryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryCache").field("root", &self.root).finish()
    }
}

impl LibraryCache {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cell(&self, source: &LibrarySource) -> Arc<OnceCell<PathBuf>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(source.clone()).or_default().clone()
    }

    /// Local directory holding the content of `source`
    ///
    /// Remote sources are fetched on first request only; concurrent
    /// requests for the same source wait for that single fetch. A failed
    /// fetch is not cached.
    pub async fn working_copy(&self, source: &LibrarySource) -> Result<PathBuf> {
        let (url, reference) = match source {
            LibrarySource::Path(path) => return Ok(path.clone()),
            LibrarySource::Git { url, reference } => (url, reference),
        };

        let cell = self.cell(source);
        let path = cell
            .get_or_try_init(|| async {
                let destination = self.root.join(source.cache_key());
                info!(url = %url, reference = ?reference, "Fetching library");
                self.fetcher
                    .fetch(url, reference.as_deref(), &destination)
                    .await?;
                Ok::<_, Error>(destination)
            })
            .await?;
        debug!(url = %url, path = %path.display(), "Using library working copy");
        Ok(path.clone())
    }

    /// Copy the files selected by `identifier` into `target`
    ///
    /// `target` is the requiring test's directory; the identifier's
    /// destination is appended to it.
    pub async fn fetch(&self, identifier: &LibraryIdentifier, target: &Path) -> Result<Vec<PathBuf>> {
        let source = identifier.source()?;
        let copy = self.working_copy(&source).await?;
        let destination = match &identifier.destination {
            Some(sub) => target.join(sub),
            None => target.to_path_buf(),
        };
        let patterns = identifier.patterns();
        tokio::task::spawn_blocking(move || file::fetch_files(&copy, &patterns, &destination))
            .await
            .map_err(|e| Error::new(ErrorKind::General, "Library copy task failed.").with_source(e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str, _reference: Option<&str>, destination: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            std::fs::create_dir_all(destination.join("lib"))?;
            std::fs::write(destination.join("lib/helper.sh"), "echo helper")?;
            std::fs::write(destination.join("README"), "readme")?;
            Ok(())
        }
    }

    fn git(pattern: &[&str]) -> LibraryIdentifier {
        LibraryIdentifier {
            url: Some("https://example.com/libs.git".to_string()),
            path: None,
            reference: Some("main".to_string()),
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            destination: None,
            optional: false,
        }
    }

    #[test]
    fn test_identifier_yaml() {
        let yaml = "url: https://example.com/libs.git\nref: main\npattern: lib\n";
        let identifier: LibraryIdentifier = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(identifier, git(&["lib"]));

        let plain: LibraryIdentifier = serde_yaml::from_str("path: /srv/files\n").unwrap();
        assert_eq!(plain.patterns(), vec!["/".to_string()]);
        assert_eq!(plain.source().unwrap(), LibrarySource::Path(PathBuf::from("/srv/files")));
    }

    #[test]
    fn test_identifier_without_source() {
        let identifier: LibraryIdentifier = serde_yaml::from_str("pattern: x\n").unwrap();
        assert_eq!(identifier.source().unwrap_err().kind(), ErrorKind::Specification);
    }

    #[tokio::test]
    async fn test_same_source_fetched_once() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = Arc::new(LibraryCache::new(root.path(), fetcher.clone()));

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let lib = git(&["lib"]);
        let readme = git(&["README"]);
        let (a, b) = tokio::join!(
            cache.fetch(&lib, first.path()),
            cache.fetch(&readme, second.path()),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(first.path().join("lib/helper.sh").exists());
        assert!(second.path().join("README").exists());
        assert!(!second.path().join("lib").exists());
    }

    #[tokio::test]
    async fn test_different_refs_fetched_separately() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = LibraryCache::new(root.path(), fetcher.clone());

        let mut other = git(&["lib"]);
        other.reference = Some("devel".to_string());
        let target = tempfile::tempdir().unwrap();
        cache.fetch(&git(&["lib"]), target.path()).await.unwrap();
        cache.fetch(&other, target.path()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_match_reported_as_library_error() {
        let root = tempfile::tempdir().unwrap();
        let cache = LibraryCache::new(root.path(), Arc::new(CountingFetcher::default()));
        let target = tempfile::tempdir().unwrap();
        let err = cache.fetch(&git(&["nothing-here"]), target.path()).await.unwrap_err();
        assert!(err.is_library_not_found());
    }
}
