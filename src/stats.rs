//! Store statistics.
//!
//! A quick summary of what's indexed, per collection: entry count, vector
//! dimension, distinct commit authors and log sources, the commit date
//! range, and when the collection was last written. Used by `chx stats` to confirm that
//! ingestion did what it should.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use commit_harness_core::models::format_commit_date;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    pub dims: i64,
    pub entries: i64,
    pub authors: i64,
    pub sources: i64,
    pub oldest_commit: Option<i64>,
    pub newest_commit: Option<i64>,
    pub last_write: Option<i64>,
}

/// Per-collection statistics, ordered by name.
pub async fn collect_stats(pool: &SqlitePool) -> Result<Vec<CollectionStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            c.name,
            c.dims,
            COUNT(e.id) AS entries,
            COUNT(DISTINCT e.author) AS authors,
            COUNT(DISTINCT e.source) AS sources,
            MIN(e.committed_at) AS oldest,
            MAX(e.committed_at) AS newest,
            MAX(e.updated_at) AS last_write
        FROM collections c
        LEFT JOIN entries e ON e.collection = c.name
        GROUP BY c.name, c.dims
        ORDER BY c.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CollectionStats {
            name: row.get("name"),
            dims: row.get("dims"),
            entries: row.get("entries"),
            authors: row.get("authors"),
            sources: row.get("sources"),
            oldest_commit: row.get("oldest"),
            newest_commit: row.get("newest"),
            last_write: row.get("last_write"),
        })
        .collect())
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let stats = collect_stats(store.pool()).await;
    store.close().await;
    let stats = stats?;

    let db_path = config.store.db_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let total: i64 = stats.iter().map(|s| s.entries).sum();

    println!("Commit Harness — Store Stats");
    println!("============================");
    println!();
    println!("  Store:       {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Entries:     {}", total);

    if stats.is_empty() {
        println!();
        println!("  No collections yet. Run `chx ingest` or `chx ingest-logs` first.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:>5} {:>8} {:>8} {:>8}   {:<19}   {:<19}   {}",
        "COLLECTION",
        "DIMS",
        "ENTRIES",
        "AUTHORS",
        "SOURCES",
        "OLDEST COMMIT",
        "NEWEST COMMIT",
        "LAST WRITE"
    );
    println!("  {}", "-".repeat(117));

    for s in &stats {
        let last_write = match s.last_write {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        };
        println!(
            "  {:<20} {:>5} {:>8} {:>8} {:>8}   {:<19}   {:<19}   {}",
            s.name,
            s.dims,
            s.entries,
            s.authors,
            s.sources,
            s.oldest_commit.map(format_commit_date).unwrap_or_else(|| "-".to_string()),
            s.newest_commit.map(format_commit_date).unwrap_or_else(|| "-".to_string()),
            last_write
        );
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_commit_date(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_commit_date(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use commit_harness_core::models::{
        CommitMetadata, EntryMetadata, IndexEntry, LogChunkMetadata,
    };
    use commit_harness_core::store::VectorStore;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(1000), "1970-01-01 00:16:40");
    }

    #[tokio::test]
    async fn test_collect_stats() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteStore::new(pool.clone());

        let commits = store.ensure_collection("commits", 2).await.unwrap();
        store.ensure_collection("empty", 4).await.unwrap();
        let logs = store.ensure_collection("logs", 2).await.unwrap();

        let entries: Vec<IndexEntry> = [("a1", "Bo", 1000), ("b2", "Bo", 1001), ("c3", "Jo", 1002)]
            .into_iter()
            .map(|(sha, author, ts)| IndexEntry {
                id: format!("commit_{}", sha),
                document: sha.to_string(),
                embedding: vec![1.0, 0.0],
                metadata: EntryMetadata::Commit(CommitMetadata {
                    author: author.to_string(),
                    committed_at: ts,
                    committed_date: format_commit_date(ts),
                    hexsha: sha.to_string(),
                }),
                content_hash: String::new(),
            })
            .collect();
        store.upsert(&commits, &entries).await.unwrap();

        let chunks: Vec<IndexEntry> = [("Build", "a.txt"), ("Test", "a.txt"), ("Build", "b.txt")]
            .into_iter()
            .enumerate()
            .map(|(i, (stage, source))| IndexEntry {
                id: format!("log_chunk_{}", i),
                document: stage.to_string(),
                embedding: vec![0.0, 1.0],
                metadata: EntryMetadata::LogChunk(LogChunkMetadata {
                    stage: stage.to_string(),
                    source: source.to_string(),
                }),
                content_hash: String::new(),
            })
            .collect();
        store.upsert(&logs, &chunks).await.unwrap();

        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].name, "commits");
        assert_eq!(stats[0].dims, 2);
        assert_eq!(stats[0].entries, 3);
        assert_eq!(stats[0].authors, 2);
        assert_eq!(stats[0].sources, 0);
        assert_eq!(stats[0].oldest_commit, Some(1000));
        assert_eq!(stats[0].newest_commit, Some(1002));
        assert!(stats[0].last_write.is_some());

        assert_eq!(stats[1].name, "empty");
        assert_eq!(stats[1].entries, 0);
        assert_eq!(stats[1].oldest_commit, None);

        assert_eq!(stats[2].name, "logs");
        assert_eq!(stats[2].entries, 3);
        assert_eq!(stats[2].authors, 0);
        assert_eq!(stats[2].sources, 2);
        assert_eq!(stats[2].oldest_commit, None);
    }
}
