//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs next to the document and
//! its metadata columns. Queries scan the collection and rank by cosine
//! distance in Rust; there is no approximate index.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use commit_harness_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use commit_harness_core::models::{
    CollectionHandle, CommitMetadata, EntryMetadata, IndexEntry, LogChunkMetadata, SearchHit,
};
use commit_harness_core::store::{check_entry, check_query, rank_hits, VectorStore};
use commit_harness_core::StoreError;

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn write_err(e: sqlx::Error) -> StoreError {
    StoreError::Write(e.to_string())
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Metadata flattened into the `entries` columns.
#[derive(Default)]
struct MetadataColumns<'a> {
    kind: &'static str,
    author: Option<&'a str>,
    committed_at: Option<i64>,
    committed_date: Option<&'a str>,
    hexsha: Option<&'a str>,
    stage: Option<&'a str>,
    source: Option<&'a str>,
}

fn metadata_columns(metadata: &EntryMetadata) -> MetadataColumns<'_> {
    match metadata {
        EntryMetadata::Commit(m) => MetadataColumns {
            kind: metadata.kind(),
            author: Some(&m.author),
            committed_at: Some(m.committed_at),
            committed_date: Some(&m.committed_date),
            hexsha: Some(&m.hexsha),
            ..Default::default()
        },
        EntryMetadata::LogChunk(m) => MetadataColumns {
            kind: metadata.kind(),
            stage: Some(&m.stage),
            source: Some(&m.source),
            ..Default::default()
        },
    }
}

fn required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<Option<T>, _>(column)
        .map_err(query_err)?
        .ok_or_else(|| StoreError::Query(format!("entry is missing its {} column", column)))
}

fn metadata_from_row(row: &SqliteRow) -> Result<EntryMetadata, StoreError> {
    let kind: String = row.try_get("kind").map_err(query_err)?;
    match kind.as_str() {
        "commit" => Ok(EntryMetadata::Commit(CommitMetadata {
            author: required(row, "author")?,
            committed_at: required(row, "committed_at")?,
            committed_date: required(row, "committed_date")?,
            hexsha: required(row, "hexsha")?,
        })),
        "log_chunk" => Ok(EntryMetadata::LogChunk(LogChunkMetadata {
            stage: required(row, "stage")?,
            source: required(row, "source")?,
        })),
        other => Err(StoreError::Query(format!("unknown entry kind '{}'", other))),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dims: usize,
    ) -> Result<CollectionHandle, StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO collections (name, dims, created_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(dims as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        let stored: i64 = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(write_err)?;

        if stored as usize != dims {
            return Err(StoreError::Write(format!(
                "collection '{}' has dimension {}, requested {}. Use a new collection_name or rebuild the store.",
                name, stored, dims
            )));
        }

        Ok(CollectionHandle {
            name: name.to_string(),
            dims,
        })
    }

    async fn open_collection(&self, name: &str) -> Result<Option<CollectionHandle>, StoreError> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        Ok(dims.map(|d| CollectionHandle {
            name: name.to_string(),
            dims: d as usize,
        }))
    }

    async fn upsert(
        &self,
        handle: &CollectionHandle,
        entries: &[IndexEntry],
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();

        for entry in entries {
            check_entry(handle, entry)?;
            let blob = vec_to_blob(&entry.embedding);
            let meta = metadata_columns(&entry.metadata);

            sqlx::query(
                r#"
                INSERT INTO entries (collection, id, document, embedding, kind, author,
                                     committed_at, committed_date, hexsha, stage, source,
                                     content_hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    embedding = excluded.embedding,
                    kind = excluded.kind,
                    author = excluded.author,
                    committed_at = excluded.committed_at,
                    committed_date = excluded.committed_date,
                    hexsha = excluded.hexsha,
                    stage = excluded.stage,
                    source = excluded.source,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&handle.name)
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(&blob)
            .bind(meta.kind)
            .bind(meta.author)
            .bind(meta.committed_at)
            .bind(meta.committed_date)
            .bind(meta.hexsha)
            .bind(meta.stage)
            .bind(meta.source)
            .bind(&entry.content_hash)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        }

        Ok(())
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        check_query(handle, vector, k)?;

        let rows = sqlx::query(
            r#"
            SELECT id, document, embedding, kind, author, committed_at, committed_date,
                   hexsha, stage, source
            FROM entries
            WHERE collection = ?
            "#,
        )
        .bind(&handle.name)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                Ok(SearchHit {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata: metadata_from_row(row)?,
                    distance: cosine_distance(vector, &stored),
                })
            })
            .collect::<Result<Vec<SearchHit>, StoreError>>()?;

        Ok(rank_hits(hits, k))
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(&handle.name)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(n as usize)
    }

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT id FROM entries WHERE collection = ? ORDER BY id")
            .bind(&handle.name)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)
    }

    async fn content_hashes(
        &self,
        handle: &CollectionHandle,
        ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let rows = sqlx::query("SELECT id, content_hash FROM entries WHERE collection = ?")
            .bind(&handle.name)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                if wanted.contains(id.as_str()) {
                    Some((id, row.get("content_hash")))
                } else {
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn entry(id: &str, doc: &str, v: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            document: doc.to_string(),
            embedding: v,
            metadata: EntryMetadata::Commit(CommitMetadata {
                author: "Bo".to_string(),
                committed_at: 1000,
                committed_date: "1970-01-01 00:16:40".to_string(),
                hexsha: id.to_string(),
            }),
            content_hash: format!("h-{}", doc),
        }
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let store = memory_store().await;
        let a = store.ensure_collection("commits", 3).await.unwrap();
        let b = store.ensure_collection("commits", 3).await.unwrap();
        assert_eq!(a, b);
        let err = store.ensure_collection("commits", 5).await.unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
    }

    #[tokio::test]
    async fn test_upsert_then_query() {
        let store = memory_store().await;
        let h = store.ensure_collection("commits", 2).await.unwrap();
        store
            .upsert(
                &h,
                &[
                    entry("commit_0_a1", "fix bug", vec![1.0, 0.0]),
                    entry("commit_1_b2", "add feature", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.query(&h, &[0.9, 0.1], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "commit_0_a1");
        assert_eq!(hits[0].metadata.as_commit().unwrap().author, "Bo");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_open_collection() {
        let store = memory_store().await;
        assert!(store.open_collection("commits").await.unwrap().is_none());
        store.ensure_collection("commits", 3).await.unwrap();
        let handle = store.open_collection("commits").await.unwrap().unwrap();
        assert_eq!(handle.dims, 3);

        let err = store.query(&handle, &[1.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_log_chunk_metadata_round_trip() {
        let store = memory_store().await;
        let h = store.ensure_collection("jenkins_logs", 2).await.unwrap();
        let chunk = IndexEntry {
            id: "log_chunk_0".to_string(),
            document: "[Pipeline] stage: Build\nmake\n".to_string(),
            embedding: vec![1.0, 0.0],
            metadata: EntryMetadata::LogChunk(LogChunkMetadata {
                stage: "Build".to_string(),
                source: "logs/41.txt".to_string(),
            }),
            content_hash: "h".to_string(),
        };
        store.upsert(&h, &[chunk.clone()]).await.unwrap();

        let hits = store.query(&h, &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].metadata, chunk.metadata);
        assert_eq!(hits[0].document, chunk.document);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = memory_store().await;
        let h = store.ensure_collection("commits", 2).await.unwrap();
        store
            .upsert(&h, &[entry("x", "first", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&h, &[entry("x", "second", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count(&h).await.unwrap(), 1);
        let hashes = store.content_hashes(&h, &["x".to_string()]).await.unwrap();
        assert_eq!(hashes["x"], "h-second");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = memory_store().await;
        let a = store.ensure_collection("a", 2).await.unwrap();
        let b = store.ensure_collection("b", 2).await.unwrap();
        store
            .upsert(&a, &[entry("x", "only in a", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count(&a).await.unwrap(), 1);
        assert_eq!(store.count(&b).await.unwrap(), 0);
        assert!(store.query(&b, &[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_validation() {
        let store = memory_store().await;
        let h = store.ensure_collection("commits", 2).await.unwrap();
        assert!(matches!(
            store.query(&h, &[1.0, 0.0], 0).await,
            Err(StoreError::Query(_))
        ));
        assert!(matches!(
            store.query(&h, &[1.0], 1).await,
            Err(StoreError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_query_shorter_than_k() {
        let store = memory_store().await;
        let h = store.ensure_collection("commits", 2).await.unwrap();
        store
            .upsert(&h, &[entry("only", "only", vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = store.query(&h, &[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
