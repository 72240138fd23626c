use anyhow::Result;
use sqlx::SqlitePool;

/// Create the store schema. Idempotent.
///
/// `entries` holds both corpora; `kind` says which metadata columns are
/// set (`author`..`hexsha` for commits, `stage` and `source` for CI log
/// chunks).
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            kind TEXT NOT NULL,
            author TEXT,
            committed_at INTEGER,
            committed_date TEXT,
            hexsha TEXT,
            stage TEXT,
            source TEXT,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_hexsha ON entries(collection, hexsha)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_committed_at ON entries(collection, committed_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(collection, source)")
        .execute(pool)
        .await?;

    Ok(())
}
