//! Architecture change counter

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use triage_core::{ArchitectureChangeRecord, IncrementOutcome};

use super::{to_i64, to_u64};
use crate::Result;

/// Per-project important-change counter
pub struct ArchitectureTrackingRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ArchitectureTrackingRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Count `revision` for `project` in one statement
    ///
    /// The upsert skips the update when `revision` is already the last one
    /// counted, so no row comes back for a duplicate. Reaching the threshold
    /// resets the stored count to zero in the same statement; `last_count`
    /// keeps the value the increment reached and `last_should_summarize` the
    /// trigger, which a duplicate reads back.
    pub async fn increment(
        &self,
        project: &str,
        revision: &str,
        threshold: u64,
    ) -> Result<IncrementOutcome> {
        let threshold = to_i64(threshold.max(1), "threshold")?;

        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            INSERT INTO architecture_tracking
                (project, change_count, last_count, last_should_summarize, last_revision, updated_at)
            VALUES (?1, CASE WHEN 1 >= ?2 THEN 0 ELSE 1 END, 1, 1 >= ?2, ?3, ?4)
            ON CONFLICT(project) DO UPDATE SET
                last_count = architecture_tracking.change_count + 1,
                change_count = CASE
                    WHEN architecture_tracking.change_count + 1 >= ?2 THEN 0
                    ELSE architecture_tracking.change_count + 1
                END,
                last_should_summarize = architecture_tracking.change_count + 1 >= ?2,
                last_revision = excluded.last_revision,
                updated_at = excluded.updated_at
            WHERE architecture_tracking.last_revision IS NOT excluded.last_revision
            RETURNING last_count, change_count
            "#,
        )
        .bind(project)
        .bind(threshold)
        .bind(revision)
        .bind(Utc::now())
        .fetch_optional(self.pool)
        .await?;

        let outcome = match row {
            None => IncrementOutcome::Duplicate {
                should_summarize: self.replayed_trigger(project, revision).await?,
            },
            Some((last_count, change_count)) => IncrementOutcome::Counted {
                count: to_u64(last_count, "change count")?,
                should_summarize: change_count == 0,
            },
        };

        debug!(project, revision, ?outcome, "Counted important change");
        Ok(outcome)
    }

    /// Trigger recorded when `revision` was counted; false if another
    /// revision has been counted since
    async fn replayed_trigger(&self, project: &str, revision: &str) -> Result<bool> {
        let flag = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT last_should_summarize
            FROM architecture_tracking
            WHERE project = ? AND last_revision = ?
            "#,
        )
        .bind(project)
        .bind(revision)
        .fetch_optional(self.pool)
        .await?;

        Ok(flag.unwrap_or(false))
    }

    pub async fn get(&self, project: &str) -> Result<Option<ArchitectureChangeRecord>> {
        let row = sqlx::query_as::<_, (String, i64, Option<String>, bool, DateTime<Utc>)>(
            r#"
            SELECT project, change_count, last_revision, last_should_summarize, updated_at
            FROM architecture_tracking
            WHERE project = ?
            "#,
        )
        .bind(project)
        .fetch_optional(self.pool)
        .await?;

        row.map(
            |(project, change_count, last_revision, last_should_summarize, updated_at)| {
                Ok(ArchitectureChangeRecord {
                    project,
                    change_count: to_u64(change_count, "change count")?,
                    last_revision,
                    last_should_summarize,
                    updated_at,
                })
            },
        )
        .transpose()
    }

    /// Clear the counter and the last counted revision
    pub async fn reset(&self, project: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE architecture_tracking
            SET change_count = 0, last_count = 0, last_should_summarize = 0,
                last_revision = NULL, updated_at = ?
            WHERE project = ?
            "#,
        )
        .bind(Utc::now())
        .bind(project)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
