//! HNSW vector store for approximate nearest-neighbour search

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::collections::HashSet;
use std::sync::RwLock;

use super::{
    check_dimension, cosine_similarity, ChunkMetadata, StoreError, VectorEntry, VectorMatch,
    VectorStore,
};
use crate::config::IndexingConfig;

/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

struct Slot {
    chunk_id: String,
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

struct HnswState {
    index: Hnsw<'static, f32, DistCosine>,
    /// HNSW point id -> entry, `None` once deleted
    slots: Vec<Option<Slot>>,
    by_id: HashMap<String, usize>,
}

impl HnswState {
    fn live(&self) -> usize {
        self.by_id.len()
    }

    fn tombstones(&self) -> usize {
        self.slots.len() - self.by_id.len()
    }
}

/// Vector store backed by an `hnsw_rs` graph.
///
/// Unrestricted queries walk the graph. Queries restricted to a candidate
/// set score the candidates exactly with cosine similarity, since a
/// pre-filtered set is usually small and the graph cannot be filtered
/// during traversal. Deleted points are tombstoned and skipped; the graph
/// is rebuilt once tombstones outnumber live entries.
pub struct HnswVectorStore {
    state: RwLock<HnswState>,
    config: IndexingConfig,
}

impl HnswVectorStore {
    pub fn new(config: IndexingConfig) -> Self {
        let index = Self::build_index(&config);
        Self {
            state: RwLock::new(HnswState {
                index,
                slots: Vec::new(),
                by_id: HashMap::new(),
            }),
            config,
        }
    }

    fn build_index(config: &IndexingConfig) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::<f32, DistCosine>::new(
            config.hnsw_m,
            config.max_elements,
            MAX_LAYERS,
            config.hnsw_ef_construction,
            DistCosine,
        )
    }

    pub fn dimension(&self) -> usize {
        self.config.vector_dim
    }

    /// Number of live vectors
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.live()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HnswState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("HNSW index lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HnswState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("HNSW index lock poisoned".to_string()))
    }

    fn tombstone(state: &mut HnswState, chunk_id: &str) -> bool {
        match state.by_id.remove(chunk_id) {
            Some(slot) => {
                state.slots[slot] = None;
                true
            }
            None => false,
        }
    }

    fn insert_slot(state: &mut HnswState, entry: &VectorEntry) {
        let slot = state.slots.len();
        state.index.insert((&entry.vector, slot));
        state.slots.push(Some(Slot {
            chunk_id: entry.chunk_id.clone(),
            vector: entry.vector.clone(),
            metadata: entry.metadata.clone(),
        }));
        state.by_id.insert(entry.chunk_id.clone(), slot);
    }

    /// Re-insert live entries into a fresh graph, dropping tombstones
    fn rebuild(&self, state: &mut HnswState) {
        let live: Vec<Slot> = state.slots.drain(..).flatten().collect();
        state.index = Self::build_index(&self.config);
        state.by_id.clear();

        for slot in live {
            let entry = VectorEntry {
                chunk_id: slot.chunk_id,
                vector: slot.vector,
                metadata: slot.metadata,
            };
            Self::insert_slot(state, &entry);
        }

        tracing::debug!(live = state.live(), "Rebuilt HNSW graph");
    }

    fn exact_search(
        state: &HnswState,
        query: &[f32],
        k: usize,
        restrict_to: &HashSet<String>,
    ) -> Vec<VectorMatch> {
        let mut matches: Vec<VectorMatch> = restrict_to
            .iter()
            .filter_map(|chunk_id| state.by_id.get(chunk_id))
            .filter_map(|slot| state.slots[*slot].as_ref())
            .map(|slot| VectorMatch {
                chunk_id: slot.chunk_id.clone(),
                score: cosine_similarity(query, &slot.vector),
                metadata: Some(slot.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(k);
        matches
    }

    fn graph_search(&self, state: &HnswState, query: &[f32], k: usize) -> Vec<VectorMatch> {
        // Over-fetch so tombstoned neighbours do not starve the result
        let request = (k + state.tombstones()).min(state.slots.len());
        let ef_search = self.config.hnsw_ef_search.max(request);

        let mut matches: Vec<VectorMatch> = state
            .index
            .search(query, request, ef_search)
            .into_iter()
            .filter_map(|neighbour| {
                state
                    .slots
                    .get(neighbour.d_id)
                    .and_then(Option::as_ref)
                    .map(|slot| VectorMatch {
                        chunk_id: slot.chunk_id.clone(),
                        score: 1.0 - neighbour.distance,
                        metadata: Some(slot.metadata.clone()),
                    })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);
        matches
    }
}

#[async_trait]
impl VectorStore for HnswVectorStore {
    async fn add_vectors(&self, entries: &[VectorEntry]) -> Result<(), StoreError> {
        for entry in entries {
            check_dimension(self.config.vector_dim, entry.vector.len())?;
        }

        let mut state = self.write()?;
        for entry in entries {
            Self::tombstone(&mut state, &entry.chunk_id);
            Self::insert_slot(&mut state, entry);
        }

        tracing::debug!(added = entries.len(), live = state.live(), "Added vectors");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        restrict_to: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        check_dimension(self.config.vector_dim, query.len())?;

        let state = self.read()?;
        if k == 0 || state.live() == 0 {
            return Ok(Vec::new());
        }

        Ok(match restrict_to {
            Some(candidates) => Self::exact_search(&state, query, k, candidates),
            None => self.graph_search(&state, query, k),
        })
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        for chunk_id in chunk_ids {
            Self::tombstone(&mut state, chunk_id);
        }

        if state.tombstones() > state.live() {
            self.rebuild(&mut state);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.index = Self::build_index(&self.config);
        state.slots.clear();
        state.by_id.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dimension: usize) -> IndexingConfig {
        IndexingConfig {
            vector_dim: dimension,
            ..Default::default()
        }
    }

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    fn entry(id: &str, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            chunk_id: id.to_string(),
            vector,
            metadata: ChunkMetadata::new("art", "p1", "note", "2024-01-01"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let store = HnswVectorStore::new(config(8));

        let mut close = unit(8, 0);
        close[1] = 0.1;
        store
            .add_vectors(&[
                entry("x", unit(8, 0)),
                entry("y", unit(8, 1)),
                entry("near-x", close),
            ])
            .await
            .unwrap();
        assert_eq!(store.len(), 3);

        let results = store.search(&unit(8, 0), 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "x");
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].chunk_id, "near-x");
    }

    #[tokio::test]
    async fn test_restricted_search_is_exact() {
        let store = HnswVectorStore::new(config(4));
        store
            .add_vectors(&[entry("a", unit(4, 0)), entry("b", unit(4, 1)), entry("c", unit(4, 2))])
            .await
            .unwrap();

        let allowed: HashSet<String> = ["b".to_string(), "c".to_string()].into_iter().collect();
        let results = store.search(&unit(4, 1), 5, Some(&allowed)).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_deleted_vectors_are_not_returned() {
        let store = HnswVectorStore::new(config(4));
        store
            .add_vectors(&[entry("a", unit(4, 0)), entry("b", unit(4, 1))])
            .await
            .unwrap();

        store.delete(&["a".to_string()]).await.unwrap();
        assert_eq!(store.len(), 1);

        let results = store.search(&unit(4, 0), 2, None).await.unwrap();
        assert!(results.iter().all(|m| m.chunk_id != "a"));
    }

    #[tokio::test]
    async fn test_readding_replaces_vector() {
        let store = HnswVectorStore::new(config(4));
        store.add_vectors(&[entry("a", unit(4, 0))]).await.unwrap();
        store.add_vectors(&[entry("a", unit(4, 3))]).await.unwrap();
        assert_eq!(store.len(), 1);

        let results = store.search(&unit(4, 3), 1, None).await.unwrap();
        assert_eq!(results[0].chunk_id, "a");
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_dimension_validation() {
        let store = HnswVectorStore::new(config(4));
        let result = store.add_vectors(&[entry("a", vec![1.0; 3])]).await;
        assert!(matches!(result, Err(StoreError::InvalidDimension { .. })));

        let result = store.search(&[1.0; 2], 1, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = HnswVectorStore::new(config(4));
        store.add_vectors(&[entry("a", unit(4, 0))]).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(store.search(&unit(4, 0), 1, None).await.unwrap().is_empty());
    }
}
