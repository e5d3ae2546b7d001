//! Pull requests as reviewable changes

use async_trait::async_trait;
use octocrab::models::pulls::PullRequest as OctocrabPR;
use tracing::{debug, info};
use triage_core::host::unposted_comments;
use triage_core::{ChangeContext, ExternalError, ReviewComment, VersionControl};

use crate::{Error, GitHubClient, Result};

const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";

/// Pull request fields that feed a [`ChangeContext`]
#[derive(Debug, Clone, Default)]
pub(crate) struct PullFields {
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub base_sha: String,
    pub head_sha: String,
    pub labels: Vec<String>,
    pub draft: Option<bool>,
    pub head_repository: Option<String>,
    pub base_repository: Option<String>,
}

impl From<OctocrabPR> for PullFields {
    fn from(pr: OctocrabPR) -> Self {
        PullFields {
            number: pr.number,
            title: pr.title,
            body: pr.body,
            author: pr.user.map(|u| u.login),
            head_repository: pr.head.repo.as_ref().and_then(|r| r.full_name.clone()),
            base_repository: pr.base.repo.as_ref().and_then(|r| r.full_name.clone()),
            base_sha: pr.base.sha,
            head_sha: pr.head.sha,
            labels: pr
                .labels
                .unwrap_or_default()
                .into_iter()
                .map(|l| l.name)
                .collect(),
            draft: pr.draft,
        }
    }
}

impl PullFields {
    /// Build a [`ChangeContext`] for a pull request of `target_repository`
    ///
    /// A head without a repository (deleted fork) is treated as coming from
    /// an unknown origin so it never passes the same-repository check.
    pub fn into_change(self, target_repository: &str) -> ChangeContext {
        ChangeContext {
            id: self.number,
            title: self.title.unwrap_or_default(),
            description: self.body.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            base_revision: self.base_sha,
            head_revision: self.head_sha,
            labels: self.labels,
            draft: self.draft.unwrap_or(false),
            origin_repository: self
                .head_repository
                .unwrap_or_else(|| "<unknown>".to_string()),
            target_repository: self
                .base_repository
                .unwrap_or_else(|| target_repository.to_string()),
        }
    }
}

/// Render a comment for the issue-comment API
///
/// Comments anchored to a file are posted at change level with their location
/// in front.
fn comment_body(comment: &ReviewComment) -> String {
    match (&comment.path, comment.line) {
        (Some(path), Some(line)) => format!("`{}:{}`\n\n{}", path, line, comment.body),
        (Some(path), None) => format!("`{}`\n\n{}", path, comment.body),
        _ => comment.body.clone(),
    }
}

impl GitHubClient {
    /// Fetch a pull request as a change
    pub async fn get_change_context(&self, number: u64) -> Result<ChangeContext> {
        debug!(number, "Fetching pull request");

        let pr = self
            .client()
            .pulls(self.owner(), self.repo())
            .get(number)
            .await
            .map_err(|e| match &e {
                octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404 => {
                    Error::PrNotFound(number)
                }
                _ => Error::Api(e),
            })?;

        Ok(PullFields::from(pr).into_change(&self.full_name()))
    }

    /// Unified diff between two commits, via the compare API
    pub async fn compare_diff(&self, base: &str, head: &str) -> Result<String> {
        let path = format!(
            "/repos/{}/{}/compare/{}...{}",
            self.owner(),
            self.repo(),
            base,
            head
        );
        let diff = self.get_text(&path, DIFF_MEDIA_TYPE).await?;
        debug!(base, head, bytes = diff.len(), "Fetched diff");
        Ok(diff)
    }

    /// Bodies of all issue comments on a pull request
    pub async fn issue_comment_bodies(&self, number: u64) -> Result<Vec<String>> {
        let page = self
            .client()
            .issues(self.owner(), self.repo())
            .list_comments(number)
            .per_page(100)
            .send()
            .await
            .map_err(Error::Api)?;
        let comments = self.client().all_pages(page).await.map_err(Error::Api)?;

        Ok(comments.into_iter().filter_map(|c| c.body).collect())
    }

    /// Post comments on a pull request, skipping any already posted for `revision`
    pub async fn post_review_comments(
        &self,
        number: u64,
        revision: &str,
        comments: &[ReviewComment],
    ) -> Result<()> {
        let existing = self.issue_comment_bodies(number).await?;
        let pending = unposted_comments(revision, comments.iter().map(comment_body), &existing);
        if pending.len() < comments.len() {
            info!(
                number,
                revision,
                skipped = comments.len() - pending.len(),
                "Review comments already posted for this revision"
            );
        }

        for body in &pending {
            self.client()
                .issues(self.owner(), self.repo())
                .create_comment(number, body)
                .await?;
        }
        info!(number, revision, count = pending.len(), "Posted review comments");
        Ok(())
    }
}

#[async_trait]
impl VersionControl for GitHubClient {
    async fn get_change(&self, id: u64) -> std::result::Result<ChangeContext, ExternalError> {
        Ok(self.get_change_context(id).await?)
    }

    async fn get_diff(
        &self,
        base: &str,
        head: &str,
        _exclude: &[String],
    ) -> std::result::Result<String, ExternalError> {
        Ok(self.compare_diff(base, head).await?)
    }

    async fn post_comments(
        &self,
        change_id: u64,
        revision: &str,
        comments: &[ReviewComment],
    ) -> std::result::Result<(), ExternalError> {
        Ok(self
            .post_review_comments(change_id, revision, comments)
            .await?)
    }
}
