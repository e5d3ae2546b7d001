//! [`ArchitectureStore`] backed by SQLite

use async_trait::async_trait;
use triage_core::{
    ArchitectureChangeRecord, ArchitectureStore, ArchitectureSummary, ExternalError,
    IncrementOutcome, PartialMacros,
};

use crate::Database;

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl ArchitectureStore for SqliteStore {
    async fn project_defaults(&self, project: &str) -> Result<PartialMacros, ExternalError> {
        let stored = self.db.project_defaults().get(project).await?;
        Ok(PartialMacros::from_key_values(
            stored.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ))
    }

    async fn set_project_defaults(
        &self,
        project: &str,
        defaults: &PartialMacros,
    ) -> Result<(), ExternalError> {
        self.db
            .project_defaults()
            .set(project, &defaults.to_key_values())
            .await?;
        Ok(())
    }

    async fn increment_and_maybe_reset(
        &self,
        project: &str,
        revision: &str,
        threshold: u64,
    ) -> Result<IncrementOutcome, ExternalError> {
        Ok(self.db.tracking().increment(project, revision, threshold).await?)
    }

    async fn change_record(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureChangeRecord>, ExternalError> {
        Ok(self.db.tracking().get(project).await?)
    }

    async fn append_architecture_summary(
        &self,
        project: &str,
        change_id: u64,
        summary: &str,
    ) -> Result<(), ExternalError> {
        self.db
            .summaries()
            .append(project, change_id, summary)
            .await?;
        Ok(())
    }

    async fn latest_architecture_summary(
        &self,
        project: &str,
    ) -> Result<Option<ArchitectureSummary>, ExternalError> {
        Ok(self.db.summaries().latest(project).await?)
    }
}
