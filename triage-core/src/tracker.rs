//! Architecture change tracking
//!
//! Counts important changes per project through the store and reports when
//! enough have accumulated to refresh the architecture summary. The tracker
//! never caches the record; every call goes to the store.

use tracing::{debug, info};

use crate::error::ExternalError;
use crate::retry::{CallClass, RetryError, RetryExecutor};
use crate::store::{ArchitectureStore, IncrementOutcome};

/// Store-backed important-change counter
pub struct ArchitectureTracker<'a> {
    store: &'a dyn ArchitectureStore,
    retry: &'a RetryExecutor,
}

impl<'a> ArchitectureTracker<'a> {
    pub fn new(store: &'a dyn ArchitectureStore, retry: &'a RetryExecutor) -> Self {
        Self { store, retry }
    }

    /// Count one important change identified by `revision`
    ///
    /// Errors are returned to the caller untouched; whether a failure aborts
    /// or degrades the run is decided by the pipeline.
    pub async fn record_important_change(
        &self,
        project: &str,
        revision: &str,
        threshold: u64,
    ) -> Result<IncrementOutcome, RetryError<ExternalError>> {
        let outcome = self
            .retry
            .execute(CallClass::Store, "increment_architecture_counter", || {
                self.store
                    .increment_and_maybe_reset(project, revision, threshold)
            })
            .await?;

        match outcome {
            IncrementOutcome::Counted {
                count,
                should_summarize,
            } => info!(
                project,
                revision,
                count,
                threshold,
                should_summarize,
                "Counted important change"
            ),
            IncrementOutcome::Duplicate { should_summarize } => debug!(
                project,
                revision,
                should_summarize,
                "Revision already counted, skipping"
            ),
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::PartialMacros;
    use crate::retry::{CallTimeouts, RetryPolicy};
    use crate::store::{ArchitectureChangeRecord, ArchitectureSummary, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose tracker update always fails
    struct BrokenStore {
        calls: AtomicU32,
        error: ExternalError,
    }

    #[async_trait]
    impl ArchitectureStore for BrokenStore {
        async fn project_defaults(&self, _: &str) -> Result<PartialMacros, ExternalError> {
            Err(self.error.clone())
        }

        async fn set_project_defaults(&self, _: &str, _: &PartialMacros) -> Result<(), ExternalError> {
            Err(self.error.clone())
        }

        async fn increment_and_maybe_reset(
            &self,
            _: &str,
            _: &str,
            _: u64,
        ) -> Result<IncrementOutcome, ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }

        async fn change_record(
            &self,
            _: &str,
        ) -> Result<Option<ArchitectureChangeRecord>, ExternalError> {
            Err(self.error.clone())
        }

        async fn append_architecture_summary(&self, _: &str, _: u64, _: &str) -> Result<(), ExternalError> {
            Err(self.error.clone())
        }

        async fn latest_architecture_summary(
            &self,
            _: &str,
        ) -> Result<Option<ArchitectureSummary>, ExternalError> {
            Err(self.error.clone())
        }
    }

    fn retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::immediate(2), CallTimeouts::default())
    }

    #[tokio::test]
    async fn test_records_through_store() {
        let store = MemoryStore::new();
        let retry = retry();
        let tracker = ArchitectureTracker::new(&store, &retry);

        let outcome = tracker.record_important_change("proj", "r1", 2).await.unwrap();
        assert!(!outcome.should_summarize());
        let outcome = tracker.record_important_change("proj", "r2", 2).await.unwrap();
        assert!(outcome.should_summarize());
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried_then_returned() {
        let store = BrokenStore {
            calls: AtomicU32::new(0),
            error: ExternalError::transient("store", "database is locked"),
        };
        let retry = retry();
        let tracker = ArchitectureTracker::new(&store, &retry);

        let err = tracker.record_important_change("proj", "r1", 5).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_store_failure_not_retried() {
        let store = BrokenStore {
            calls: AtomicU32::new(0),
            error: ExternalError::permanent("store", "no such table"),
        };
        let retry = retry();
        let tracker = ArchitectureTracker::new(&store, &retry);

        let err = tracker.record_important_change("proj", "r1", 5).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
