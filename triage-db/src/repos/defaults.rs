//! Project-wide review defaults

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::Result;

/// Key/value defaults stored per project
pub struct ProjectDefaultsRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProjectDefaultsRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// All stored defaults for a project, empty if none
    pub async fn get(&self, project: &str) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM project_defaults WHERE project = ? ORDER BY key",
        )
        .bind(project)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Upsert the given keys; keys not present are left as they are
    pub async fn set(&self, project: &str, values: &BTreeMap<String, String>) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (key, value) in values {
            sqlx::query(
                r#"
                INSERT INTO project_defaults (project, key, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(project, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(project)
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(project, keys = values.len(), "Stored project defaults");
        Ok(())
    }

    /// Remove one key, returning whether it existed
    pub async fn remove(&self, project: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM project_defaults WHERE project = ? AND key = ?")
            .bind(project)
            .bind(key)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use std::collections::BTreeMap;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_set_merges_keys() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.project_defaults();

        repo.set("acme/widgets", &values(&[("LINE_THRESHOLD", "300")]))
            .await
            .unwrap();
        repo.set(
            "acme/widgets",
            &values(&[("LINE_THRESHOLD", "250"), ("CHANGES_THRESHOLD", "5")]),
        )
        .await
        .unwrap();

        let stored = repo.get("acme/widgets").await.unwrap();
        assert_eq!(
            stored,
            values(&[("CHANGES_THRESHOLD", "5"), ("LINE_THRESHOLD", "250")])
        );
        assert!(repo.get("acme/other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.project_defaults();

        repo.set("p", &values(&[("LINE_THRESHOLD", "300")]))
            .await
            .unwrap();
        assert!(repo.remove("p", "LINE_THRESHOLD").await.unwrap());
        assert!(!repo.remove("p", "LINE_THRESHOLD").await.unwrap());
        assert!(repo.get("p").await.unwrap().is_empty());
    }
}
