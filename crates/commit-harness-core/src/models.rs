//! Core data models used throughout Commit Harness.
//!
//! These types represent the commits, CI log chunks, index entries, and
//! search hits that flow through the ingestion and retrieval pipelines.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::corpus::Corpus;

/// A single commit read from repository history.
///
/// Created once per commit at extraction time and never mutated. The
/// message is the raw commit message, newlines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub hexsha: String,
    pub author: String,
    pub message: String,
    /// Committer timestamp, epoch seconds.
    pub committed_at: i64,
}

impl CommitRecord {
    /// Committer date rendered as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn committed_date(&self) -> String {
        format_commit_date(self.committed_at)
    }
}

/// One pipeline stage's worth of lines from a CI log file.
///
/// `text` keeps the original lines, newlines included, starting with the
/// stage marker line (except for the lines before the first marker, whose
/// stage is `"unknown"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub source: String,
    pub stage: String,
    pub text: String,
    /// Position of this chunk within its file.
    pub ordinal: usize,
}

/// Render epoch seconds the way commit metadata stores dates.
pub fn format_commit_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub author: String,
    pub committed_at: i64,
    pub committed_date: String,
    pub hexsha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunkMetadata {
    pub stage: String,
    pub source: String,
}

/// Metadata stored next to each embedded document.
///
/// Serialised flat with a `kind` tag, e.g.
/// `{"kind": "commit", "author": "Bo", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMetadata {
    Commit(CommitMetadata),
    LogChunk(LogChunkMetadata),
}

impl EntryMetadata {
    pub fn kind(&self) -> &'static str {
        match self {
            EntryMetadata::Commit(_) => "commit",
            EntryMetadata::LogChunk(_) => "log_chunk",
        }
    }

    pub fn as_commit(&self) -> Option<&CommitMetadata> {
        match self {
            EntryMetadata::Commit(m) => Some(m),
            EntryMetadata::LogChunk(_) => None,
        }
    }

    pub fn as_log_chunk(&self) -> Option<&LogChunkMetadata> {
        match self {
            EntryMetadata::LogChunk(m) => Some(m),
            EntryMetadata::Commit(_) => None,
        }
    }
}

impl From<&CommitRecord> for EntryMetadata {
    fn from(record: &CommitRecord) -> Self {
        EntryMetadata::Commit(CommitMetadata {
            author: record.author.clone(),
            committed_at: record.committed_at,
            committed_date: record.committed_date(),
            hexsha: record.hexsha.clone(),
        })
    }
}

impl From<&LogChunk> for EntryMetadata {
    fn from(chunk: &LogChunk) -> Self {
        EntryMetadata::LogChunk(LogChunkMetadata {
            stage: chunk.stage.clone(),
            source: chunk.source.clone(),
        })
    }
}

/// A unit of text the ingestion pipeline can embed and store.
pub trait SourceRecord: Sync {
    /// Which corpus the record belongs to; decides id format and prompt.
    const CORPUS: Corpus;

    /// Identity that does not depend on extraction order.
    fn key(&self) -> String;

    /// The text that is embedded and stored as the document.
    fn text(&self) -> &str;

    fn metadata(&self) -> EntryMetadata;
}

impl SourceRecord for CommitRecord {
    const CORPUS: Corpus = Corpus::Commits;

    fn key(&self) -> String {
        self.hexsha.clone()
    }

    fn text(&self) -> &str {
        &self.message
    }

    fn metadata(&self) -> EntryMetadata {
        EntryMetadata::from(self)
    }
}

impl SourceRecord for LogChunk {
    const CORPUS: Corpus = Corpus::Logs;

    /// First 16 hex digits of `sha256(source, ordinal)`.
    fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.ordinal.to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn metadata(&self) -> EntryMetadata {
        EntryMetadata::from(self)
    }
}

/// One row of a vector store collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
    /// SHA-256 over the embedding model name and the document.
    pub content_hash: String,
}

/// A ranked retrieval result. Lower `distance` means closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
    pub distance: f32,
}

/// Reference to a named collection with a fixed vector dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: String,
    pub dims: usize,
}

/// Hash identifying what an entry's embedding was computed from.
///
/// Re-ingesting a record whose hash matches the stored one can skip the
/// embedding call entirely.
pub fn content_hash(model_name: &str, document: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_date_format() {
        let record = CommitRecord {
            hexsha: "a1".to_string(),
            author: "Bo".to_string(),
            message: "fix bug".to_string(),
            committed_at: 1_700_000_000,
        };
        assert_eq!(record.committed_date(), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_metadata_from_record() {
        let record = CommitRecord {
            hexsha: "b2".to_string(),
            author: "Jo".to_string(),
            message: "add feature\n\nlonger body\n".to_string(),
            committed_at: 1001,
        };
        let meta = EntryMetadata::from(&record);
        let commit = meta.as_commit().unwrap();
        assert_eq!(commit.hexsha, "b2");
        assert_eq!(commit.author, "Jo");
        assert_eq!(commit.committed_at, 1001);
        assert_eq!(commit.committed_date, "1970-01-01 00:16:41");
        assert!(meta.as_log_chunk().is_none());
        assert_eq!(record.text(), "add feature\n\nlonger body\n");
        assert_eq!(record.key(), "b2");
    }

    #[test]
    fn test_log_chunk_metadata_and_key() {
        let chunk = LogChunk {
            source: "data/logs/build-41.txt".to_string(),
            stage: "Build".to_string(),
            text: "[Pipeline] stage: Build\nmake all\n".to_string(),
            ordinal: 1,
        };
        let meta = chunk.metadata();
        assert_eq!(meta.kind(), "log_chunk");
        assert_eq!(meta.as_log_chunk().unwrap().stage, "Build");
        assert_eq!(meta.as_log_chunk().unwrap().source, "data/logs/build-41.txt");

        let key = chunk.key();
        assert_eq!(key.len(), 16);
        assert_eq!(key, chunk.clone().key());
        let next = LogChunk {
            ordinal: 2,
            ..chunk.clone()
        };
        assert_ne!(next.key(), key);
    }

    #[test]
    fn test_content_hash_depends_on_model() {
        let a = content_hash("all-minilm-l6-v2", "fix bug");
        let b = content_hash("nomic-embed-text", "fix bug");
        assert_ne!(a, b);
        assert_eq!(a, content_hash("all-minilm-l6-v2", "fix bug"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_search_hit_json_shape() {
        let hit = SearchHit {
            id: "commit_0_a1".to_string(),
            document: "fix bug".to_string(),
            metadata: EntryMetadata::Commit(CommitMetadata {
                author: "Bo".to_string(),
                committed_at: 1000,
                committed_date: "1970-01-01 00:16:40".to_string(),
                hexsha: "a1".to_string(),
            }),
            distance: 0.5,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["id"], "commit_0_a1");
        assert_eq!(json["metadata"]["kind"], "commit");
        assert_eq!(json["metadata"]["author"], "Bo");
        assert_eq!(json["metadata"]["committed_date"], "1970-01-01 00:16:40");
        assert_eq!(json["distance"], 0.5);
    }

    #[test]
    fn test_log_chunk_metadata_json_shape() {
        let meta = EntryMetadata::LogChunk(LogChunkMetadata {
            stage: "Test".to_string(),
            source: "logs/a.txt".to_string(),
        });
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "log_chunk");
        assert_eq!(json["stage"], "Test");
        let back: EntryMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_content_hash_separates_fields() {
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
    }
}
