//! Triage GitHub - GitHub host adapter for Triage
//!
//! Implements [`triage_core::VersionControl`] over the GitHub REST API:
//! pull requests become [`triage_core::ChangeContext`]s, diffs come from the
//! compare API and reviews are posted as pull request comments.

mod change;
mod client;
mod error;

pub use client::{parse_github_url, GitHubClient, DEFAULT_API_URL};
pub use error::{Error, Result};
