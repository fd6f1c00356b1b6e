//! Locating the repository that owns a file.
//!
//! `git2::Repository` is only opened inside a blocking task and never leaves
//! it; callers get a fully owned [`RepoContext`].

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use git2::{ErrorCode, Repository};
use regex::Regex;

use crate::error::RepositoryError;

/// Matches scp-style (`git@host:owner/repo.git`) and URL-style
/// (`https://host/owner/repo`, `ssh://git@host:22/owner/repo.git`) remotes.
static REMOTE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://)?(?:[^@/]+@)?([^/:@]+)(?::\d+)?[:/](.+?)(?:\.git)?/?$")
        .expect("remote url pattern is valid")
});

/// Where a file lives in version control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoContext {
    /// Absolute, canonical root of the working tree.
    pub working_directory: PathBuf,
    /// Path of the file relative to `working_directory`, `/`-separated.
    pub relative_path: String,
    /// URL of the `origin` remote, if configured.
    pub origin_url: Option<String>,
}

impl RepoContext {
    /// Finds the working tree containing `file`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotARepository`] when `file` is outside any working
    /// tree; I/O errors when `file` cannot be resolved.
    pub async fn discover(file: &Path) -> Result<Self, RepositoryError> {
        let file = file.to_path_buf();
        tokio::task::spawn_blocking(move || discover_blocking(&file))
            .await
            .map_err(|e| RepositoryError::Join(e.to_string()))?
    }

    /// The key annotations for this repository are stored under.
    ///
    /// Normalized `host/owner/repo` when the origin URL is recognizable, the
    /// raw origin URL otherwise, and `local:<working directory>` when there is
    /// no origin remote.
    pub fn repo_key(&self) -> String {
        match &self.origin_url {
            Some(url) => normalize_remote_url(url).unwrap_or_else(|| url.trim().to_owned()),
            None => format!("local:{}", self.working_directory.display()),
        }
    }
}

fn discover_blocking(file: &Path) -> Result<RepoContext, RepositoryError> {
    let absolute = std::fs::canonicalize(file).map_err(|source| RepositoryError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let start = absolute.parent().unwrap_or(&absolute);

    let repo = Repository::discover(start).map_err(|e| match e.code() {
        ErrorCode::NotFound => RepositoryError::NotARepository(absolute.clone()),
        _ => RepositoryError::Git(e),
    })?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| RepositoryError::Bare(repo.path().to_path_buf()))?;
    let working_directory =
        std::fs::canonicalize(workdir).map_err(|source| RepositoryError::Io {
            path: workdir.to_path_buf(),
            source,
        })?;

    let relative = absolute
        .strip_prefix(&working_directory)
        .map_err(|_| RepositoryError::NotARepository(absolute.clone()))?;
    let relative_path = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    let origin_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_owned));

    Ok(RepoContext {
        working_directory,
        relative_path,
        origin_url,
    })
}

/// Normalizes a remote URL to `host/owner/repo`.
///
/// SSH and HTTPS remotes of the same repository normalize identically.
/// Returns `None` for remotes without a host, such as local paths.
pub fn normalize_remote_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.starts_with("file:") {
        return None;
    }
    let caps = REMOTE_URL.captures(url)?;
    let host = caps.get(1)?.as_str().to_lowercase();
    let path = caps.get(2)?.as_str().trim_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(format!("{host}/{path}"))
}
