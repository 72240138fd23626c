//! In-memory [`VectorStore`] implementation for tests and embedding callers.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Queries are brute-force
//! cosine distance over every entry in the collection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::{CollectionHandle, IndexEntry, SearchHit};

use super::{check_entry, check_query, rank_hits, VectorStore};

struct Collection {
    dims: usize,
    entries: HashMap<String, IndexEntry>,
}

/// In-memory store keyed by collection name, then entry id.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Query("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Write("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(name: &str) -> String {
    format!("collection '{}' does not exist", name)
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dims: usize,
    ) -> Result<CollectionHandle, StoreError> {
        let mut collections = self.write()?;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dims,
                entries: HashMap::new(),
            });
        if collection.dims != dims {
            return Err(StoreError::Write(format!(
                "collection '{}' has dimension {}, requested {}",
                name, collection.dims, dims
            )));
        }
        Ok(CollectionHandle {
            name: name.to_string(),
            dims,
        })
    }

    async fn open_collection(&self, name: &str) -> Result<Option<CollectionHandle>, StoreError> {
        let collections = self.read()?;
        Ok(collections.get(name).map(|c| CollectionHandle {
            name: name.to_string(),
            dims: c.dims,
        }))
    }

    async fn upsert(
        &self,
        handle: &CollectionHandle,
        entries: &[IndexEntry],
    ) -> Result<(), StoreError> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&handle.name)
            .ok_or_else(|| StoreError::Write(missing(&handle.name)))?;
        for entry in entries {
            check_entry(handle, entry)?;
            collection.entries.insert(entry.id.clone(), entry.clone());
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
        let collections = self.read()?;
        let collection = collections
            .get(&handle.name)
            .ok_or_else(|| StoreError::Query(missing(&handle.name)))?;
        let hits = collection
            .entries
            .values()
            .map(|e| SearchHit {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                distance: cosine_distance(vector, &e.embedding),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, StoreError> {
        let collections = self.read()?;
        Ok(collections
            .get(&handle.name)
            .map(|c| c.entries.len())
            .unwrap_or(0))
    }

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, StoreError> {
        let collections = self.read()?;
        let mut ids: Vec<String> = collections
            .get(&handle.name)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn content_hashes(
        &self,
        handle: &CollectionHandle,
        ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError> {
        let collections = self.read()?;
        let Some(collection) = collections.get(&handle.name) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                collection
                    .entries
                    .get(id)
                    .map(|e| (id.clone(), e.content_hash.clone()))
            })
            .collect())
    }
}
