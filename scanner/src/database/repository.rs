//! Repository layer for database operations
//!
//! Raw CRUD over the `history` and `preferences` tables. Errors are
//! returned as generic database errors; the services above decide which
//! typed failure the caller sees.

use super::models::*;
use crate::error::Result;
use sqlx::SqlitePool;

/// Columns selected for a `HistoryEntry`. Rows written before the `time`
/// column existed read back as timestamp 0.
const HISTORY_COLUMNS: &str = "id, COALESCE(date, '') AS date, COALESCE(time, 0) AS time, \
     COALESCE(codeType, 0) AS codeType, COALESCE(codeValue, '') AS codeValue, note, imagePath";

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a history row
    pub async fn insert_history(&self, req: NewHistoryEntry) -> Result<HistoryEntry> {
        let sql = format!(
            "INSERT INTO history (date, time, codeType, codeValue, imagePath) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            HISTORY_COLUMNS
        );

        let entry = sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(&req.date)
            .bind(req.time)
            .bind(req.code_type)
            .bind(&req.code_value)
            .bind(&req.image_path)
            .fetch_one(&self.pool)
            .await?;

        tracing::debug!("Created history entry: {}", entry.id);
        Ok(entry)
    }

    /// Get a history row by ID
    pub async fn get_history(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let sql = format!("SELECT {} FROM history WHERE id = ?", HISTORY_COLUMNS);

        let entry = sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// List all history rows, newest first
    pub async fn list_history(&self) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT {} FROM history ORDER BY time DESC, id DESC",
            HISTORY_COLUMNS
        );

        let entries = sqlx::query_as::<_, HistoryEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Delete a history row, returns the number of rows removed
    pub async fn delete_history(&self, id: i64) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM history WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted history entry: {} ({} rows)", id, rows);
        Ok(rows)
    }

    /// Delete every row with `time < cutoff`, a missing time counting as 0.
    ///
    /// Returns the number of rows removed and the image paths they referenced.
    pub async fn purge_history_before(&self, cutoff: i64) -> Result<(u64, Vec<String>)> {
        let mut tx = self.pool.begin().await?;

        let image_paths: Vec<String> = sqlx::query_scalar(
            "SELECT imagePath FROM history WHERE COALESCE(time, 0) < ? AND imagePath IS NOT NULL",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let rows = sqlx::query("DELETE FROM history WHERE COALESCE(time, 0) < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::debug!("Purged {} history rows older than {}", rows, cutoff);
        Ok((rows, image_paths))
    }

    /// Delete all history rows, returns the image paths they referenced
    pub async fn clear_history(&self) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let image_paths: Vec<String> =
            sqlx::query_scalar("SELECT imagePath FROM history WHERE imagePath IS NOT NULL")
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM history").execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::debug!("Cleared history");
        Ok(image_paths)
    }

    /// Get a preference value
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Insert or replace a preference value
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Set preference: {} = {}", key, value);
        Ok(())
    }

    /// Write several preferences in one transaction
    pub async fn set_preferences(&self, values: &[(&str, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in values {
            sqlx::query(
                r#"
                INSERT INTO preferences (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(*key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!("Set {} preferences", values.len());
        Ok(())
    }

    /// List all stored preferences
    pub async fn list_preferences(&self) -> Result<Vec<Preference>> {
        let preferences =
            sqlx::query_as::<_, Preference>("SELECT key, value FROM preferences ORDER BY key")
                .fetch_all(&self.pool)
                .await?;

        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;

    async fn create_test_repo() -> Repository {
        Repository::new(create_memory_pool().await.unwrap())
    }

    fn entry(time: i64, value: &str) -> NewHistoryEntry {
        NewHistoryEntry {
            date: "17-10-2026".to_string(),
            time,
            code_type: 256,
            code_value: value.to_string(),
            image_path: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_history() {
        let repo = create_test_repo().await;

        let created = repo.insert_history(entry(1_000, "hello")).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.code_value, "hello");
        assert_eq!(created.code_type, 256);
        assert_eq!(created.note, None);

        let fetched = repo.get_history(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_list_history_newest_first() {
        let repo = create_test_repo().await;

        repo.insert_history(entry(100, "old")).await.unwrap();
        repo.insert_history(entry(300, "new")).await.unwrap();
        repo.insert_history(entry(200, "mid")).await.unwrap();

        let values: Vec<String> = repo
            .list_history()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.code_value)
            .collect();
        assert_eq!(values, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_delete_history() {
        let repo = create_test_repo().await;

        let created = repo.insert_history(entry(1, "x")).await.unwrap();

        assert_eq!(repo.delete_history(created.id).await.unwrap(), 1);
        assert_eq!(repo.delete_history(created.id).await.unwrap(), 0);
        assert!(repo.get_history(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_history_before_returns_image_paths() {
        let repo = create_test_repo().await;

        let mut with_image = entry(10, "old");
        with_image.image_path = Some("/tmp/old.jpg".to_string());
        repo.insert_history(with_image).await.unwrap();
        repo.insert_history(entry(20, "old too")).await.unwrap();
        repo.insert_history(entry(50, "kept")).await.unwrap();

        let (rows, paths) = repo.purge_history_before(50).await.unwrap();
        assert_eq!(rows, 2);
        assert_eq!(paths, vec!["/tmp/old.jpg".to_string()]);

        let remaining = repo.list_history().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].code_value, "kept");
    }

    #[tokio::test]
    async fn test_preferences() {
        let repo = create_test_repo().await;

        assert_eq!(repo.get_preference("sound_enabled").await.unwrap(), None);

        repo.set_preference("sound_enabled", "true").await.unwrap();
        assert_eq!(
            repo.get_preference("sound_enabled").await.unwrap(),
            Some("true".to_string())
        );

        // Update existing
        repo.set_preference("sound_enabled", "false").await.unwrap();
        assert_eq!(
            repo.get_preference("sound_enabled").await.unwrap(),
            Some("false".to_string())
        );
    }

    #[tokio::test]
    async fn test_set_preferences_batch() {
        let repo = create_test_repo().await;

        repo.set_preferences(&[("a", "1".to_string()), ("b", "2".to_string())])
            .await
            .unwrap();

        let all = repo.list_preferences().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "a");
        assert_eq!(all[1].value, "2");
    }
}
