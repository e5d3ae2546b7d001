//! Snapshot of a reviewable change

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Immutable view of one change (pull request) as fetched from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
    /// Change number on the host
    pub id: u64,
    pub title: String,
    /// Free-text description (may carry per-change macros and checkboxes)
    pub description: String,
    pub author: String,
    /// Revision the change is based on
    pub base_revision: String,
    /// Revision under review; also the tracker's deduplication key
    pub head_revision: String,
    pub labels: Vec<String>,
    pub draft: bool,
    /// Repository the change's commits come from (`owner/name`)
    pub origin_repository: String,
    /// Repository the change targets (`owner/name`)
    pub target_repository: String,
}

impl ChangeContext {
    /// True if the change comes from a fork of the target repository
    pub fn is_from_fork(&self) -> bool {
        !self
            .origin_repository
            .eq_ignore_ascii_case(&self.target_repository)
    }

    /// Non-draft and from the target repository itself
    pub fn is_reviewable(&self) -> bool {
        !self.draft && !self.is_from_fork()
    }

    /// Check that the change may be reviewed automatically
    ///
    /// Drafts and changes from forks are rejected; the caller is expected to
    /// filter them out already, this is the last line.
    pub fn ensure_reviewable(&self) -> Result<()> {
        if self.draft {
            return Err(Error::Validation(format!(
                "Change #{} is a draft",
                self.id
            )));
        }
        if self.is_from_fork() {
            return Err(Error::Validation(format!(
                "Change #{} comes from {} which is not {}",
                self.id, self.origin_repository, self.target_repository
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_change() -> ChangeContext {
        ChangeContext {
            id: 42,
            title: "Refactor storage layer".to_string(),
            description: String::new(),
            author: "octo".to_string(),
            base_revision: "base000".to_string(),
            head_revision: "head111".to_string(),
            labels: Vec::new(),
            draft: false,
            origin_repository: "acme/widgets".to_string(),
            target_repository: "acme/widgets".to_string(),
        }
    }

    #[test]
    fn test_same_repository_is_reviewable() {
        assert!(sample_change().ensure_reviewable().is_ok());
    }

    #[test]
    fn test_fork_rejected() {
        let change = ChangeContext {
            origin_repository: "mallory/widgets".to_string(),
            ..sample_change()
        };
        assert!(change.is_from_fork());
        assert!(change.ensure_reviewable().is_err());
    }

    #[test]
    fn test_draft_rejected() {
        let change = ChangeContext {
            draft: true,
            ..sample_change()
        };
        let err = change.ensure_reviewable().unwrap_err();
        assert!(err.to_string().contains("draft"));
    }
}
