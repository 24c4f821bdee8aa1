//! Database schema and migrations
//!
//! This module handles database initialization and schema migrations.
//! Journal mode and timeouts are connection options, see `connect_options`.
//!
//! Migrations are additive only. Column additions look at
//! `pragma_table_info` first, so a table that already carries the column
//! (for example one created by an older build that skipped the version
//! bookkeeping) is left untouched instead of failing the upgrade.

use crate::error::Result;
use sqlx::{sqlite::SqlitePool, Row, Sqlite, Transaction};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// One step of a migration
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Plain SQL script, statements separated by `;`
    Sql(&'static str),
    /// `ALTER TABLE .. ADD COLUMN` guarded by a column existence check
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

/// Initialize database with schema
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing database schema");

    // Create migrations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version = schema_version(pool).await?;

    tracing::info!("Current database version: {}", current_version);

    // Apply migrations
    apply_migrations(pool, current_version).await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

/// Highest applied migration version (0 for a fresh database)
pub async fn schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?
        .get(0);
    Ok(version)
}

async fn apply_migrations(pool: &SqlitePool, current_version: i32) -> Result<()> {
    for (version, steps) in get_migrations() {
        if version <= current_version {
            continue;
        }

        tracing::info!("Applying migration version {}", version);

        // Execute migration in a transaction
        let mut tx = pool.begin().await?;

        for step in steps {
            apply_step(&mut tx, *step).await?;
        }

        // Record migration
        sqlx::query("INSERT INTO migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("Migration version {} applied successfully", version);
    }

    Ok(())
}

async fn apply_step(tx: &mut Transaction<'_, Sqlite>, step: Step) -> Result<()> {
    match step {
        Step::Sql(sql) => {
            for statement in sql.split(';').filter(|s| !statement_is_empty(s)) {
                sqlx::query(statement).execute(&mut **tx).await?;
            }
        }
        Step::AddColumn {
            table,
            column,
            definition,
        } => {
            let existing: Vec<String> =
                sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
                    .bind(table)
                    .fetch_all(&mut **tx)
                    .await?;

            if existing.iter().any(|name| name.eq_ignore_ascii_case(column)) {
                tracing::debug!("Column {}.{} already present, skipping", table, column);
                return Ok(());
            }

            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
            sqlx::query(&sql).execute(&mut **tx).await?;
            tracing::debug!("Added column {}.{}", table, column);
        }
    }

    Ok(())
}

/// A chunk between `;` that holds only whitespace and `--` comments
fn statement_is_empty(statement: &str) -> bool {
    statement
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

fn get_migrations() -> Vec<(i32, &'static [Step])> {
    const V1: &[Step] = &[Step::Sql(include_str!("migrations/001_initial_schema.sql"))];
    const V2: &[Step] = &[
        Step::AddColumn {
            table: "history",
            column: "time",
            definition: "INTEGER",
        },
        // Rows from before the column read as the epoch
        Step::Sql("UPDATE history SET time = 0 WHERE time IS NULL"),
        Step::Sql(include_str!("migrations/002_history_time_index.sql")),
    ];
    const V3: &[Step] = &[Step::AddColumn {
        table: "history",
        column: "imagePath",
        definition: "TEXT",
    }];

    vec![(1, V1), (2, V2), (3, V3)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Repository;
    use crate::services::HistoryStore;
    use crate::storage::ImageStorage;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn history_columns(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info('history')")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_database() {
        let pool = memory_pool().await;

        initialize_database(&pool).await.unwrap();

        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);

        let columns = history_columns(&pool).await;
        for expected in ["id", "date", "time", "codeType", "codeValue", "note", "imagePath"] {
            assert!(columns.iter().any(|c| c == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = memory_pool().await;

        initialize_database(&pool).await.unwrap();
        initialize_database(&pool).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION as i64);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_existing_rows() {
        let pool = memory_pool().await;

        // A version 1 database with one row and no time/imagePath columns
        sqlx::query("CREATE TABLE migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)")
            .execute(&pool)
            .await
            .unwrap();
        for statement in include_str!("migrations/001_initial_schema.sql")
            .split(';')
            .filter(|s| !statement_is_empty(s))
        {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        sqlx::query("INSERT INTO migrations (version) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO history (date, codeType, codeValue) VALUES ('01-01-2020', 32, 'legacy')")
            .execute(&pool)
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        let value: String = sqlx::query_scalar("SELECT codeValue FROM history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "legacy");
        assert!(history_columns(&pool).await.iter().any(|c| c == "imagePath"));

        let time: Option<i64> = sqlx::query_scalar("SELECT time FROM history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(time, Some(0));

        // The legacy row is as old as the epoch, so any retention window expires it
        let temp_dir = tempfile::TempDir::new().unwrap();
        let history = HistoryStore::new(
            Repository::new(pool.clone()),
            ImageStorage::new(temp_dir.path()),
        );
        assert_eq!(history.list_all().await.unwrap()[0].time, 0);
        assert_eq!(history.purge_older_than(1).await.unwrap(), 1);
        assert!(history.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_counts_rows_without_time() {
        let pool = memory_pool().await;
        initialize_database(&pool).await.unwrap();

        sqlx::query("INSERT INTO history (date, codeType, codeValue) VALUES ('01-01-2020', 32, 'untimed')")
            .execute(&pool)
            .await
            .unwrap();

        let (rows, _) = Repository::new(pool).purge_history_before(1).await.unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_existing_column_is_not_added_twice() {
        let pool = memory_pool().await;

        // Legacy table that already has `time` but no migration bookkeeping
        sqlx::query("CREATE TABLE history (id INTEGER PRIMARY KEY AUTOINCREMENT, date TEXT, time INTEGER, codeType INTEGER, codeValue TEXT, note TEXT)")
            .execute(&pool)
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        let columns = history_columns(&pool).await;
        assert_eq!(columns.iter().filter(|c| c.as_str() == "time").count(), 1);
        assert!(columns.iter().any(|c| c == "imagePath"));
    }

    #[test]
    fn test_comment_only_chunks_are_skipped() {
        assert!(statement_is_empty("\n  -- just a comment\n"));
        assert!(!statement_is_empty("-- comment\nCREATE TABLE t (x)"));
    }
}
