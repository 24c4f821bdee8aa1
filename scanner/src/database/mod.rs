//! Scan history database
//!
//! One SQLite file holds the `history` rows and the `preferences` table.
//! `Repository` is the only thing that issues SQL against it.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// WAL journal, 5 s busy wait, file created on first open
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
        },
    )
}

/// Open the history database at `db_path`, upgrading its schema first.
///
/// The upgrade runs alone on one connection. Pooled connections are opened
/// after it so none of them caches the pre-`ALTER TABLE` column list.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening history database at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    initialize_database(&migration_pool).await?;
    migration_pool.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path)?)
        .await?;

    tracing::debug!("History database ready");

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    initialize_database(&pool).await?;
    Ok(pool)
}
