//! Local git repository access
//!
//! Lets `triage plan` compute a diff between two revisions without going
//! through the host.

use std::path::{Path, PathBuf};

use git2::{DiffFormat, DiffOptions, Repository};
use tracing::debug;

use crate::{Error, Result};

/// Information about a git remote
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    /// Name of the remote (e.g., "origin")
    pub name: String,
    /// URL of the remote
    pub url: String,
}

pub struct GitRepo {
    repo: Repository,
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open a git repository at the given path
    ///
    /// This will search upward from the given path to find the repository root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::discover(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::Config(format!("Not a git repository: {}", path.display()))
            } else {
                Error::Git(e.to_string())
            }
        })?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self { repo, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the default remote (origin, or else the first remote with a URL)
    pub fn default_remote(&self) -> Result<RemoteInfo> {
        if let Ok(remote) = self.repo.find_remote("origin") {
            if let Some(url) = remote.url() {
                return Ok(RemoteInfo {
                    name: "origin".to_string(),
                    url: url.to_string(),
                });
            }
        }

        let remotes = self
            .repo
            .remotes()
            .map_err(|e| Error::Git(format!("Failed to list remotes: {}", e)))?;

        for remote_name in remotes.iter().flatten() {
            if let Ok(remote) = self.repo.find_remote(remote_name) {
                if let Some(url) = remote.url() {
                    return Ok(RemoteInfo {
                        name: remote_name.to_string(),
                        url: url.to_string(),
                    });
                }
            }
        }

        Err(Error::Config("No remotes configured".to_string()))
    }

    /// Unified diff from `base` to `head` (any revspec git understands)
    pub fn diff_between(&self, base: &str, head: &str) -> Result<String> {
        let base_tree = self.tree_of(base)?;
        let head_tree = self.tree_of(head)?;

        let mut opts = DiffOptions::new();
        opts.context_lines(3);
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), Some(&mut opts))
            .map_err(|e| Error::Git(format!("Failed to diff {}..{}: {}", base, head, e)))?;

        let mut out = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                out.push(line.origin());
            }
            out.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .map_err(|e| Error::Git(format!("Failed to render diff: {}", e)))?;

        debug!(base, head, bytes = out.len(), "Computed local diff");
        Ok(out)
    }

    fn tree_of(&self, revspec: &str) -> Result<git2::Tree<'_>> {
        self.repo
            .revparse_single(revspec)
            .and_then(|obj| obj.peel_to_tree())
            .map_err(|e| Error::Git(format!("Unknown revision '{}': {}", revspec, e)))
    }
}
