//! In-memory collaborators with exact search

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

use super::{
    check_dimension, cosine_similarity, ChunkRecord, FilterCriteria, MetadataStore, StoreError,
    VectorEntry, VectorMatch, VectorStore,
};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

/// Brute-force cosine vector store.
///
/// Ties are broken by chunk id so results are deterministic.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    dimension: Option<usize>,
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects vectors of any other dimension
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(chunk_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_vectors(&self, entries: &[VectorEntry]) -> Result<(), StoreError> {
        if let Some(dimension) = self.dimension {
            for entry in entries {
                check_dimension(dimension, entry.vector.len())?;
            }
        }

        let mut stored = self.entries.write().map_err(poisoned)?;
        for entry in entries {
            stored.insert(entry.chunk_id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        restrict_to: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        if let Some(dimension) = self.dimension {
            check_dimension(dimension, query.len())?;
        }

        let stored = self.entries.read().map_err(poisoned)?;
        let mut matches: Vec<VectorMatch> = stored
            .values()
            .filter(|entry| restrict_to.map_or(true, |ids| ids.contains(&entry.chunk_id)))
            .map(|entry| VectorMatch {
                chunk_id: entry.chunk_id.clone(),
                score: cosine_similarity(query, &entry.vector),
                metadata: Some(entry.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        for chunk_id in chunk_ids {
            stored.remove(chunk_id);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Metadata store evaluating [`FilterCriteria`] over a map.
///
/// Filter results come back in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    inner: RwLock<MetadataState>,
}

#[derive(Debug, Default)]
struct MetadataState {
    records: HashMap<String, ChunkRecord>,
    order: Vec<String>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.inner
            .read()
            .map(|s| s.records.contains_key(chunk_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_chunks(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        for record in records {
            if state
                .records
                .insert(record.chunk_id.clone(), record.clone())
                .is_none()
            {
                state.order.push(record.chunk_id.clone());
            }
        }
        Ok(())
    }

    async fn filter_chunks(&self, criteria: &FilterCriteria) -> Result<Vec<String>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state
            .order
            .iter()
            .filter(|id| {
                state
                    .records
                    .get(*id)
                    .is_some_and(|record| criteria.matches(&record.metadata))
            })
            .cloned()
            .collect())
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        let state = &mut *guard;

        let before = state.records.len();
        for chunk_id in chunk_ids {
            state.records.remove(chunk_id);
        }
        if state.records.len() != before {
            let records = &state.records;
            state.order.retain(|id| records.contains_key(id));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        state.records.clear();
        state.order.clear();
        Ok(())
    }
}
