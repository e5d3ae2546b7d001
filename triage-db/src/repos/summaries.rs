//! Architecture summary history

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use triage_core::ArchitectureSummary;

use super::{to_i64, to_u64};
use crate::Result;

type SummaryRow = (String, i64, String, DateTime<Utc>);

/// Append-only log of architecture summaries, newest last
pub struct ArchitectureSummariesRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ArchitectureSummariesRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a summary, returning its row id
    pub async fn append(&self, project: &str, change_id: u64, summary: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO architecture_summaries (project, change_id, summary, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(project)
        .bind(to_i64(change_id, "change id")?)
        .bind(summary)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest(&self, project: &str) -> Result<Option<ArchitectureSummary>> {
        let row = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT project, change_id, summary, created_at
            FROM architecture_summaries
            WHERE project = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(project)
        .fetch_optional(self.pool)
        .await?;

        row.map(into_summary).transpose()
    }

    /// Most recent summaries first
    pub async fn list(&self, project: &str, limit: u32) -> Result<Vec<ArchitectureSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT project, change_id, summary, created_at
            FROM architecture_summaries
            WHERE project = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(project)
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(into_summary).collect()
    }
}

fn into_summary((project, change_id, summary, created_at): SummaryRow) -> Result<ArchitectureSummary> {
    Ok(ArchitectureSummary {
        project,
        change_id: to_u64(change_id, "change id")?,
        summary,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[tokio::test]
    async fn test_latest_is_last_appended() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.summaries();

        assert!(repo.latest("p").await.unwrap().is_none());

        repo.append("p", 1, "first").await.unwrap();
        repo.append("p", 2, "second").await.unwrap();
        repo.append("other", 3, "elsewhere").await.unwrap();

        let latest = repo.latest("p").await.unwrap().unwrap();
        assert_eq!(latest.change_id, 2);
        assert_eq!(latest.summary, "second");

        let history = repo.list("p", 10).await.unwrap();
        let texts: Vec<_> = history.iter().map(|s| s.summary.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
        assert_eq!(repo.list("p", 1).await.unwrap().len(), 1);
    }
}
