//! External document store interface
//!
//! The store owns project-wide defaults, the per-project architecture change
//! record and the history of architecture summaries. Implementations must make
//! [`ArchitectureStore::increment_and_maybe_reset`] a single atomic update:
//! concurrent runs for the same project never observe a half-applied
//! increment or reset.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ExternalError;
use crate::macros::PartialMacros;

/// Persisted per-project tracking state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureChangeRecord {
    pub project: String,
    /// Important changes counted since the last summary trigger
    pub change_count: u64,
    /// Revision of the last change that was counted
    pub last_revision: Option<String>,
    /// Whether counting `last_revision` crossed the threshold
    #[serde(default)]
    pub last_should_summarize: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of one tracker update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IncrementOutcome {
    /// The change was counted; `count` is the value after the increment
    /// (before any reset)
    Counted { count: u64, should_summarize: bool },
    /// The revision was already the last one counted; nothing changed.
    /// `should_summarize` repeats what counting it decided, so a retried or
    /// re-run call still sees the trigger.
    Duplicate { should_summarize: bool },
}

impl IncrementOutcome {
    pub fn should_summarize(&self) -> bool {
        match self {
            IncrementOutcome::Counted {
                should_summarize, ..
            }
            | IncrementOutcome::Duplicate { should_summarize } => *should_summarize,
        }
    }
}

/// One stored architecture summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSummary {
    pub project: String,
    pub change_id: u64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ArchitectureStore: Send + Sync {
    /// Project-wide configuration defaults (empty if none are stored)
    async fn project_defaults(&self, project: &str) -> Result<PartialMacros, ExternalError>;

    /// Replace project-wide defaults with the provided fields; `None` fields
    /// are left untouched
    async fn set_project_defaults(
        &self,
        project: &str,
        defaults: &PartialMacros,
    ) -> Result<(), ExternalError>;

    /// Atomically count `revision` for `project`
    ///
    /// Skips the increment if `revision` equals the last counted revision.
    /// When the new count reaches `threshold` the counter is reset to zero in
    /// the same update and `should_summarize` is set.
    async fn increment_and_maybe_reset(
        &self,
        project: &str,
        revision: &str,
        threshold: u64,
    ) -> Result<IncrementOutcome, ExternalError>;

    async fn change_record(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureChangeRecord>, ExternalError>;

    async fn append_architecture_summary(
        &self,
        project: &str,
        change_id: u64,
        summary: &str,
    ) -> Result<(), ExternalError>;

    async fn latest_architecture_summary(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureSummary>, ExternalError>;
}

/// Apply one increment to an in-memory record
///
/// Shared by [`MemoryStore`] and kept as the reference semantics for other
/// backends.
pub fn apply_increment(
    record: &mut ArchitectureChangeRecord,
    revision: &str,
    threshold: u64,
) -> IncrementOutcome {
    if record.last_revision.as_deref() == Some(revision) {
        return IncrementOutcome::Duplicate {
            should_summarize: record.last_should_summarize,
        };
    }

    let count = record.change_count + 1;
    let should_summarize = count >= threshold.max(1);
    record.change_count = if should_summarize { 0 } else { count };
    record.last_revision = Some(revision.to_string());
    record.last_should_summarize = should_summarize;
    record.updated_at = Utc::now();

    IncrementOutcome::Counted {
        count,
        should_summarize,
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    defaults: HashMap<String, BTreeMap<String, String>>,
    records: HashMap<String, ArchitectureChangeRecord>,
    summaries: Vec<ArchitectureSummary>,
}

/// Process-local store, for `plan`, dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All summaries stored for `project`, oldest first
    pub async fn summaries(&self, project: &str) -> Vec<ArchitectureSummary> {
        let state = self.state.lock().await;
        state
            .summaries
            .iter()
            .filter(|s| s.project == project)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArchitectureStore for MemoryStore {
    async fn project_defaults(&self, project: &str) -> Result<PartialMacros, ExternalError> {
        let state = self.state.lock().await;
        Ok(state
            .defaults
            .get(project)
            .map(|kv| PartialMacros::from_key_values(kv.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
            .unwrap_or_default())
    }

    async fn set_project_defaults(
        &self,
        project: &str,
        defaults: &PartialMacros,
    ) -> Result<(), ExternalError> {
        let mut state = self.state.lock().await;
        state
            .defaults
            .entry(project.to_string())
            .or_default()
            .extend(defaults.to_key_values());
        Ok(())
    }

    async fn increment_and_maybe_reset(
        &self,
        project: &str,
        revision: &str,
        threshold: u64,
    ) -> Result<IncrementOutcome, ExternalError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .entry(project.to_string())
            .or_insert_with(|| ArchitectureChangeRecord {
                project: project.to_string(),
                change_count: 0,
                last_revision: None,
                last_should_summarize: false,
                updated_at: Utc::now(),
            });
        Ok(apply_increment(record, revision, threshold))
    }

    async fn change_record(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureChangeRecord>, ExternalError> {
        let state = self.state.lock().await;
        Ok(state.records.get(project).cloned())
    }

    async fn append_architecture_summary(
        &self,
        project: &str,
        change_id: u64,
        summary: &str,
    ) -> Result<(), ExternalError> {
        let mut state = self.state.lock().await;
        state.summaries.push(ArchitectureSummary {
            project: project.to_string(),
            change_id,
            summary: summary.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn latest_architecture_summary(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureSummary>, ExternalError> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .iter()
            .rev()
            .find(|s| s.project == project)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_and_reset_at_threshold() {
        let store = MemoryStore::new();

        for (i, expected) in [(1, false), (2, false), (3, true)] {
            let outcome = store
                .increment_and_maybe_reset("proj", &format!("rev{}", i), 3)
                .await
                .unwrap();
            assert_eq!(
                outcome,
                IncrementOutcome::Counted {
                    count: i,
                    should_summarize: expected
                }
            );
        }

        let record = store.change_record("proj").await.unwrap().unwrap();
        assert_eq!(record.change_count, 0);
        assert_eq!(record.last_revision.as_deref(), Some("rev3"));
    }

    #[tokio::test]
    async fn test_same_revision_counted_once() {
        let store = MemoryStore::new();
        let first = store.increment_and_maybe_reset("proj", "abc", 5).await.unwrap();
        let second = store.increment_and_maybe_reset("proj", "abc", 5).await.unwrap();

        assert!(matches!(first, IncrementOutcome::Counted { count: 1, .. }));
        assert_eq!(
            second,
            IncrementOutcome::Duplicate {
                should_summarize: false
            }
        );
        assert_eq!(store.change_record("proj").await.unwrap().unwrap().change_count, 1);
    }

    #[tokio::test]
    async fn test_repeated_revision_keeps_trigger() {
        let store = MemoryStore::new();
        store.increment_and_maybe_reset("proj", "r1", 2).await.unwrap();
        let first = store.increment_and_maybe_reset("proj", "r2", 2).await.unwrap();
        let again = store.increment_and_maybe_reset("proj", "r2", 2).await.unwrap();

        assert!(first.should_summarize());
        assert_eq!(
            again,
            IncrementOutcome::Duplicate {
                should_summarize: true
            }
        );
        let record = store.change_record("proj").await.unwrap().unwrap();
        assert_eq!(record.change_count, 0);
        assert!(record.last_should_summarize);
    }

    #[tokio::test]
    async fn test_zero_threshold_treated_as_one() {
        let store = MemoryStore::new();
        let outcome = store.increment_and_maybe_reset("proj", "r", 0).await.unwrap();
        assert!(outcome.should_summarize());
    }

    #[tokio::test]
    async fn test_concurrent_increments_converge() {
        let store = Arc::new(MemoryStore::new());
        let runs = 25;

        let handles: Vec<_> = (0..runs)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .increment_and_maybe_reset("proj", &format!("rev-{}", i), 1000)
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = store.change_record("proj").await.unwrap().unwrap();
        assert_eq!(record.change_count, runs);
    }

    #[tokio::test]
    async fn test_projects_are_independent() {
        let store = MemoryStore::new();
        store.increment_and_maybe_reset("a", "r1", 5).await.unwrap();
        store.increment_and_maybe_reset("b", "r1", 5).await.unwrap();

        assert_eq!(store.change_record("a").await.unwrap().unwrap().change_count, 1);
        assert_eq!(store.change_record("b").await.unwrap().unwrap().change_count, 1);
        assert!(store.change_record("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_defaults_and_summaries() {
        let store = MemoryStore::new();
        assert!(store.project_defaults("proj").await.unwrap().is_empty());

        let defaults = PartialMacros {
            magnitude_threshold: Some(300),
            important_labels: Some(vec!["arch".into()]),
            ..Default::default()
        };
        store.set_project_defaults("proj", &defaults).await.unwrap();
        assert_eq!(store.project_defaults("proj").await.unwrap(), defaults);

        store.append_architecture_summary("proj", 1, "first").await.unwrap();
        store.append_architecture_summary("proj", 2, "second").await.unwrap();
        let latest = store.latest_architecture_summary("proj").await.unwrap().unwrap();
        assert_eq!(latest.change_id, 2);
        assert_eq!(store.summaries("proj").await.len(), 2);
    }
}
