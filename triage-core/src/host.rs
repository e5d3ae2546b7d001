//! Version-control host interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::change::ChangeContext;
use crate::error::ExternalError;

/// A comment to post on a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub body: String,
    /// File the comment refers to; `None` for a change-level comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ReviewComment {
    /// A comment on the change as a whole
    pub fn general(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            path: None,
            line: None,
        }
    }
}

/// Hidden marker for comment `index` of the review of `revision`
pub fn comment_marker(revision: &str, index: usize) -> String {
    format!("<!-- triage:{}:{} -->", revision, index)
}

/// Bodies still to post for `revision`, each ending in its marker
///
/// A body whose marker already appears in one of the `existing` comments was
/// posted by an earlier attempt and is left out, so re-running a post never
/// duplicates a comment.
pub fn unposted_comments<I, S>(revision: &str, bodies: I, existing: &[S]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    S: AsRef<str>,
{
    bodies
        .into_iter()
        .enumerate()
        .filter_map(|(index, body)| {
            let marker = comment_marker(revision, index);
            if existing.iter().any(|c| c.as_ref().contains(&marker)) {
                None
            } else {
                Some(format!("{}\n\n{}", body, marker))
            }
        })
        .collect()
}

/// Hosted version-control platform
///
/// Only called for trusted, non-draft changes; the pipeline checks
/// [`ChangeContext::is_reviewable`] before any other call.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn get_change(&self, id: u64) -> Result<ChangeContext, ExternalError>;

    /// Raw unified diff between two revisions
    ///
    /// `exclude` is passed through for hosts that can filter server side;
    /// the pipeline filters again locally either way.
    async fn get_diff(
        &self,
        base: &str,
        head: &str,
        exclude: &[String],
    ) -> Result<String, ExternalError>;

    /// Post the review of `revision`
    ///
    /// May be retried after a write that did land, so implementations skip
    /// comments already posted for the same revision (see
    /// [`unposted_comments`]).
    async fn post_comments(
        &self,
        change_id: u64,
        revision: &str,
        comments: &[ReviewComment],
    ) -> Result<(), ExternalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unposted_comments_appends_marker() {
        let existing: [&str; 0] = [];
        let bodies = unposted_comments("abc", vec!["Looks fine.".to_string()], &existing);
        assert_eq!(bodies, vec!["Looks fine.\n\n<!-- triage:abc:0 -->".to_string()]);
    }

    #[test]
    fn test_unposted_comments_skips_posted() {
        let existing = vec!["Looks fine.\n\n<!-- triage:abc:0 -->".to_string()];
        let bodies = vec!["Looks fine.".to_string(), "Second".to_string()];

        let pending = unposted_comments("abc", bodies.clone(), &existing);
        assert_eq!(pending, vec!["Second\n\n<!-- triage:abc:1 -->".to_string()]);

        // A new revision gets its own review
        let pending = unposted_comments("def", bodies, &existing);
        assert_eq!(pending.len(), 2);
    }
}
