//! SQLite database connection management.
//!
//! The vector store lives in a single SQLite file under
//! `store.persist_dir`. WAL mode is enabled so a running `chx ask` can read
//! while `chx ingest` writes.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
///
/// Creates `persist_dir` and the database file if they don't exist.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = config.store.db_path();

    std::fs::create_dir_all(&config.store.persist_dir).with_context(|| {
        format!(
            "Failed to create store directory: {}",
            config.store.persist_dir.display()
        )
    })?;

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;

    Ok(pool)
}
