//! Vector store abstraction for Commit Harness.
//!
//! The [`VectorStore`] trait is the keyed nearest-neighbour index the
//! pipelines write to and query. Backends (SQLite, in-memory) are
//! interchangeable.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ensure_collection`](VectorStore::ensure_collection) | Create or open a named collection |
//! | [`open_collection`](VectorStore::open_collection) | Look up an existing collection, read-only |
//! | [`upsert`](VectorStore::upsert) | Insert or overwrite entries by id |
//! | [`query`](VectorStore::query) | Top-k nearest entries by cosine distance |
//! | [`count`](VectorStore::count) | Number of entries in a collection |
//! | [`ids`](VectorStore::ids) | All entry ids, sorted |
//! | [`content_hashes`](VectorStore::content_hashes) | Stored content hashes for given ids |
//!
//! Each entry in an `upsert` is written atomically on its own; there is no
//! transaction spanning several entries. After a [`StoreError::Write`] the
//! caller cannot assume which entries of that call landed.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{CollectionHandle, IndexEntry, SearchHit};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent, otherwise return the existing handle.
    ///
    /// Repeated calls with the same `dims` are no-ops. A `dims` different
    /// from the one the collection was created with is a write error.
    async fn ensure_collection(&self, name: &str, dims: usize)
        -> Result<CollectionHandle, StoreError>;

    /// Handle for an existing collection, carrying its stored dimension.
    ///
    /// Query paths use this instead of [`ensure_collection`](Self::ensure_collection)
    /// so that they never create collections and a vector of the wrong
    /// dimension is rejected by [`query`](Self::query) as a query error.
    async fn open_collection(&self, name: &str)
        -> Result<Option<CollectionHandle>, StoreError>;

    /// Insert new entries and overwrite existing ones with the same id.
    async fn upsert(&self, handle: &CollectionHandle, entries: &[IndexEntry])
        -> Result<(), StoreError>;

    /// Return up to `k` entries ordered by non-decreasing distance.
    ///
    /// Fails with [`StoreError::Query`] if `k == 0` or the vector length
    /// differs from the collection dimension.
    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, StoreError>;

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, StoreError>;

    /// Map of id to stored content hash, for those `ids` that exist.
    async fn content_hashes(
        &self,
        handle: &CollectionHandle,
        ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError>;
}

/// Validate query parameters against a collection.
pub fn check_query(handle: &CollectionHandle, vector: &[f32], k: usize) -> Result<(), StoreError> {
    if k == 0 {
        return Err(StoreError::Query("k must be greater than 0".to_string()));
    }
    if vector.len() != handle.dims {
        return Err(StoreError::Query(format!(
            "query vector has dimension {} but collection '{}' has dimension {}",
            vector.len(),
            handle.name,
            handle.dims
        )));
    }
    Ok(())
}

/// Validate an entry's vector against a collection before writing it.
pub fn check_entry(handle: &CollectionHandle, entry: &IndexEntry) -> Result<(), StoreError> {
    if entry.embedding.len() != handle.dims {
        return Err(StoreError::Write(format!(
            "entry '{}' has dimension {} but collection '{}' has dimension {}",
            entry.id,
            entry.embedding.len(),
            handle.name,
            handle.dims
        )));
    }
    Ok(())
}

/// Sort hits by ascending distance, breaking ties by id, and keep `k`.
pub fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
