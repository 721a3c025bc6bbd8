//! Integration tests: hybrid search over a small patient record
//!
//! Exercises the engine through its public API with in-memory stores and a
//! scripted vector store that returns fixed similarity scores.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use medrecall::config::SearchConfig;
use medrecall::keyword::KeywordIndex;
use medrecall::retrieval::{
    ChunkMetadata, Document, HybridSearchEngine, IndexingError, SearchError, SearchFilters,
    SearchOptions,
};
use medrecall::store::{
    ChunkRecord, FilterCriteria, InMemoryMetadataStore, InMemoryVectorStore, MetadataStore,
    StoreError, VectorEntry, VectorMatch, VectorStore,
};

fn refused(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable(format!("{} refused", op)));
    }
    Ok(())
}

/// Vector store wrapper that counts searches, can return scripted scores and
/// can refuse writes for chosen chunk ids. `refuse_writes` and
/// `refuse_reads` fail every write or search while set.
#[derive(Default)]
struct ScriptedVectorStore {
    inner: InMemoryVectorStore,
    scores: HashMap<String, f32>,
    reject: HashSet<String>,
    searches: AtomicUsize,
    refuse_writes: AtomicBool,
    refuse_reads: AtomicBool,
}

impl ScriptedVectorStore {
    fn with_scores(scores: &[(&str, f32)]) -> Self {
        Self {
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            ..Default::default()
        }
    }

    fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for ScriptedVectorStore {
    async fn add_vectors(&self, entries: &[VectorEntry]) -> Result<(), StoreError> {
        refused(&self.refuse_writes, "vector write")?;
        if let Some(entry) = entries.iter().find(|e| self.reject.contains(&e.chunk_id)) {
            return Err(StoreError::Unavailable(format!(
                "write refused for {}",
                entry.chunk_id
            )));
        }
        self.inner.add_vectors(entries).await
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        restrict_to: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        refused(&self.refuse_reads, "vector search")?;
        if self.scores.is_empty() {
            return self.inner.search(query, k, restrict_to).await;
        }

        let mut matches: Vec<VectorMatch> = self
            .scores
            .iter()
            .filter(|(id, _)| restrict_to.map_or(true, |ids| ids.contains(*id)))
            .map(|(id, score)| VectorMatch {
                chunk_id: id.clone(),
                score: *score,
                metadata: None,
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        self.inner.delete(chunk_ids).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

/// In-memory metadata store whose operations can be switched to fail
#[derive(Default)]
struct FlakyMetadataStore {
    inner: InMemoryMetadataStore,
    fail_filter: AtomicBool,
    fail_get: AtomicBool,
    fail_delete: AtomicBool,
    fail_clear: AtomicBool,
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn insert_chunks(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        self.inner.insert_chunks(records).await
    }

    async fn filter_chunks(&self, criteria: &FilterCriteria) -> Result<Vec<String>, StoreError> {
        refused(&self.fail_filter, "metadata filter")?;
        self.inner.filter_chunks(criteria).await
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, StoreError> {
        refused(&self.fail_get, "metadata lookup")?;
        self.inner.get_chunks_by_ids(chunk_ids).await
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        refused(&self.fail_delete, "metadata delete")?;
        self.inner.delete_chunks(chunk_ids).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        refused(&self.fail_clear, "metadata clear")?;
        self.inner.clear().await
    }
}

fn record(id: &str, text: &str, kind: &str, occurred_at: &str) -> Document {
    Document::new(
        id,
        text,
        vec![1.0, 0.0, 0.0],
        ChunkMetadata::new(format!("artifact-{}", id), "patient-42", kind, occurred_at),
    )
}

fn diabetes_record() -> Vec<Document> {
    vec![
        record(
            "doc1",
            "Patient diagnosed with Type 2 Diabetes mellitus",
            "diagnosis",
            "2024-03-01",
        ),
        record("doc2", "Blood pressure 140/90 hypertension", "vital_sign", "2024-03-02"),
        record("doc3", "Metformin 500mg twice daily", "medication", "2024-03-03"),
    ]
}

fn engine_with(vector_store: Arc<dyn VectorStore>) -> HybridSearchEngine {
    HybridSearchEngine::new(
        KeywordIndex::new(),
        vector_store,
        Arc::new(InMemoryMetadataStore::new()),
        SearchConfig::default(),
    )
}

fn ids(results: &[medrecall::retrieval::RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.chunk_id.as_str()).collect()
}

#[tokio::test]
async fn test_pure_keyword_ranking() {
    let store = Arc::new(ScriptedVectorStore::with_scores(&[
        ("doc3", 0.9),
        ("doc1", 0.6),
        ("doc2", 0.1),
    ]));
    let engine = engine_with(store);
    let report = engine.add_documents(diabetes_record()).await;
    assert!(report.is_complete());

    let results = engine
        .search("diabetes medication", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.0))
        .await
        .unwrap();

    // Only doc1 matches a query term. doc3 and doc2 both score 0 and keep
    // their semantic order as the tie-break.
    assert_eq!(ids(&results), vec!["doc1", "doc3", "doc2"]);
    assert_eq!(results[1].keyword_score, 0.0);
    assert_eq!(results[2].keyword_score, 0.0);
    assert_eq!(results[0].keyword_score, 1.0);
    assert_eq!(results[0].score, 1.0);
    assert!(results[0].snippet.contains("Diabetes"));
}

#[tokio::test]
async fn test_pure_semantic_ranking() {
    let store = Arc::new(ScriptedVectorStore::with_scores(&[
        ("doc3", 0.9),
        ("doc1", 0.6),
        ("doc2", 0.1),
    ]));
    let engine = engine_with(store);
    engine.add_documents(diabetes_record()).await;

    let results = engine
        .search("diabetes medication", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 1.0))
        .await
        .unwrap();

    assert_eq!(ids(&results), vec!["doc3", "doc1", "doc2"]);
    assert_eq!(results[0].semantic_score, 1.0);
    assert_eq!(results[2].score, 0.0);
    assert_eq!(results[2].metadata.artifact_type, "vital_sign");
}

#[tokio::test]
async fn test_empty_filter_result_skips_both_searches() {
    let store = Arc::new(ScriptedVectorStore::default());
    let engine = engine_with(store.clone());
    engine.add_documents(diabetes_record()).await;

    let options = SearchOptions::new(5, 0.5).with_filters(SearchFilters::for_patient("patient-7"));
    let results = engine
        .search("diabetes", &[1.0, 0.0, 0.0], &options)
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(store.search_count(), 0);
}

#[tokio::test]
async fn test_filters_scope_both_channels() {
    let store = Arc::new(ScriptedVectorStore::with_scores(&[
        ("doc3", 0.9),
        ("doc1", 0.6),
        ("doc2", 0.1),
    ]));
    let engine = engine_with(store.clone());
    engine.add_documents(diabetes_record()).await;

    let filters = SearchFilters::for_patient("patient-42").with_types(["diagnosis", "vital_sign"]);
    let results = engine
        .search(
            "metformin diabetes",
            &[1.0, 0.0, 0.0],
            &SearchOptions::new(5, 0.5).with_filters(filters),
        )
        .await
        .unwrap();

    assert_eq!(ids(&results), vec!["doc1", "doc2"]);
    assert_eq!(store.search_count(), 1);
}

#[tokio::test]
async fn test_missing_patient_scope_rejected() {
    let engine = engine_with(Arc::new(ScriptedVectorStore::default()));
    engine.add_documents(diabetes_record()).await;

    let options = SearchOptions::new(5, 0.5).with_filters(SearchFilters::default().with_types(["medication"]));
    let err = engine
        .search("metformin", &[1.0, 0.0, 0.0], &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::MissingPatientScope));
}

#[tokio::test]
async fn test_batch_failure_isolated() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        Arc::new(ScriptedVectorStore::rejecting(&["doc2"])),
        metadata.clone(),
        SearchConfig::default(),
    );

    let report = engine.add_documents(diabetes_record()).await;

    assert_eq!(report.indexed, vec!["doc1", "doc3"]);
    assert_eq!(report.failed_ids(), vec!["doc2"]);
    assert!(matches!(
        report.failed[0].error,
        IndexingError::VectorStore { .. }
    ));

    // The failed document left nothing behind in any store
    assert!(!engine.contains("doc2").await);
    assert!(!metadata.contains("doc2"));
    assert_eq!(metadata.len(), 2);
    assert_eq!(engine.stats().await.total_documents, 2);
}

#[tokio::test]
async fn test_failed_update_keeps_previous_record() {
    let store = Arc::new(ScriptedVectorStore::default());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        store.clone(),
        metadata.clone(),
        SearchConfig::default(),
    );
    engine.add_documents(diabetes_record()).await;

    store.refuse_writes.store(true, Ordering::SeqCst);
    let replacement = record("doc1", "Insulin glargine 10 units nightly", "medication", "2024-04-01");
    let err = engine.update_document(replacement.clone()).await.unwrap_err();
    assert!(matches!(err, IndexingError::VectorStore { .. }));

    assert!(engine.contains("doc1").await);
    let stored = metadata.get_chunks_by_ids(&["doc1".to_string()]).await.unwrap();
    assert_eq!(stored[0].text, "Patient diagnosed with Type 2 Diabetes mellitus");
    assert_eq!(stored[0].metadata.artifact_type, "diagnosis");

    let results = engine
        .search("diabetes", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.0))
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "doc1");
    assert_eq!(results[0].keyword_score, 1.0);
    assert!(results[0].snippet.contains("Diabetes"));

    store.refuse_writes.store(false, Ordering::SeqCst);
    engine.update_document(replacement).await.unwrap();
    assert_eq!(engine.len().await, 3);

    let results = engine
        .search("insulin", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.0))
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "doc1");
    assert_eq!(results[0].keyword_score, 1.0);
    assert_eq!(results[0].metadata.artifact_type, "medication");
}

#[tokio::test]
async fn test_vector_search_failure_fails_search() {
    let store = Arc::new(ScriptedVectorStore::default());
    let engine = engine_with(store.clone());
    engine.add_documents(diabetes_record()).await;

    store.refuse_reads.store(true, Ordering::SeqCst);
    let err = engine
        .search("diabetes", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::VectorStore(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn test_metadata_filter_failure_fails_search() {
    let metadata = Arc::new(FlakyMetadataStore::default());
    let store = Arc::new(ScriptedVectorStore::default());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        store.clone(),
        metadata.clone(),
        SearchConfig::default(),
    );
    engine.add_documents(diabetes_record()).await;
    metadata.fail_filter.store(true, Ordering::SeqCst);

    let options = SearchOptions::new(3, 0.5).with_filters(SearchFilters::for_patient("patient-42"));
    let err = engine
        .search("diabetes", &[1.0, 0.0, 0.0], &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::MetadataStore(_)));
    assert_eq!(store.search_count(), 0);

    // Unfiltered searches do not consult the filter
    let results = engine
        .search("diabetes", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.5))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_metadata_lookup_failure_fails_search() {
    let metadata = Arc::new(FlakyMetadataStore::default());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        Arc::new(ScriptedVectorStore::with_scores(&[("doc1", 0.8), ("doc2", 0.4)])),
        metadata.clone(),
        SearchConfig::default(),
    );
    engine.add_documents(diabetes_record()).await;
    metadata.fail_get.store(true, Ordering::SeqCst);

    for recency_boost in [false, true] {
        let options = SearchOptions::new(3, 0.5).with_recency_boost(recency_boost);
        let err = engine
            .search("diabetes", &[1.0, 0.0, 0.0], &options)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SearchError::MetadataStore(_)),
            "recency_boost = {}",
            recency_boost
        );
    }

    metadata.fail_get.store(false, Ordering::SeqCst);
    let results = engine
        .search(
            "diabetes",
            &[1.0, 0.0, 0.0],
            &SearchOptions::new(3, 0.5).with_recency_boost(true),
        )
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "doc1");
}

#[tokio::test]
async fn test_partial_remove_and_clear_can_be_retried() {
    let metadata = Arc::new(FlakyMetadataStore::default());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        vectors.clone(),
        metadata.clone(),
        SearchConfig::default(),
    );
    engine.add_documents(diabetes_record()).await;

    metadata.fail_delete.store(true, Ordering::SeqCst);
    let err = engine.remove_document("doc2").await.unwrap_err();
    assert!(matches!(err, IndexingError::MetadataStore { .. }));
    assert_eq!(err.chunk_id(), "doc2");

    // The vector is gone but the chunk stays indexed until the retry
    assert!(!vectors.contains("doc2"));
    assert!(metadata.inner.contains("doc2"));
    assert!(engine.contains("doc2").await);

    metadata.fail_delete.store(false, Ordering::SeqCst);
    assert!(engine.remove_document("doc2").await.unwrap());
    assert!(!engine.contains("doc2").await);
    assert!(!metadata.inner.contains("doc2"));

    metadata.fail_clear.store(true, Ordering::SeqCst);
    assert!(engine.clear().await.is_err());
    assert_eq!(engine.len().await, 2);

    metadata.fail_clear.store(false, Ordering::SeqCst);
    engine.clear().await.unwrap();
    assert!(engine.is_empty().await);
    assert!(metadata.inner.is_empty());
}

#[tokio::test]
async fn test_recency_boost_reorders_equal_matches() {
    let now = Utc::now();
    let engine = engine_with(Arc::new(ScriptedVectorStore::default()));
    engine
        .add_documents(vec![
            record(
                "older",
                "Hemoglobin A1c 7.9 percent",
                "lab_result",
                &(now - Duration::days(365)).to_rfc3339(),
            ),
            record(
                "newer",
                "Hemoglobin A1c 6.8 percent",
                "lab_result",
                &(now - Duration::days(7)).to_rfc3339(),
            ),
            record("undated", "Hemoglobin A1c pending", "lab_result", "sometime in spring"),
        ])
        .await;

    let options = SearchOptions::new(3, 0.5).with_recency_boost(true);
    let results = engine
        .search("hemoglobin a1c", &[1.0, 0.0, 0.0], &options)
        .await
        .unwrap();

    let boosts: HashMap<&str, f64> = results
        .iter()
        .map(|r| (r.chunk_id.as_str(), r.recency_boost))
        .collect();
    assert_eq!(boosts["undated"], 1.0);
    assert!(boosts["newer"] > boosts["older"]);
    assert!((boosts["older"] - 0.5f64.powf(365.0 / 180.0)).abs() < 1e-3);

    let newer = results.iter().position(|r| r.chunk_id == "newer").unwrap();
    let older = results.iter().position(|r| r.chunk_id == "older").unwrap();
    assert!(newer < older);
}

#[tokio::test]
async fn test_remove_stats_and_clear() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let engine = HybridSearchEngine::new(
        KeywordIndex::new(),
        vectors.clone(),
        metadata.clone(),
        SearchConfig::default(),
    );
    engine.add_documents(diabetes_record()).await;

    let before = engine.stats().await;
    assert_eq!(before.total_documents, 3);

    assert!(engine.remove_document("doc2").await.unwrap());
    let after = engine.stats().await;
    assert_eq!(after.total_documents, 2);
    assert!(!vectors.contains("doc2"));
    assert!(!metadata.contains("doc2"));

    let results = engine
        .search("hypertension", &[1.0, 0.0, 0.0], &SearchOptions::new(3, 0.0))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.chunk_id != "doc2"));

    engine.clear().await.unwrap();
    assert!(engine.is_empty().await);
    assert!(vectors.is_empty());
    assert!(metadata.is_empty());

    // Re-adding after clear succeeds
    engine.add_documents(diabetes_record()).await;
    assert_eq!(engine.len().await, 3);
}

#[tokio::test]
async fn test_concurrent_searches_during_ingest() {
    let engine = Arc::new(engine_with(Arc::new(InMemoryVectorStore::new())));
    engine.add_documents(diabetes_record()).await;

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for i in 0..20 {
                let doc = record(
                    &format!("note-{}", i),
                    "Follow-up for diabetes management",
                    "note",
                    "2024-04-01",
                );
                engine.add_document(doc).await.unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        readers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let results = engine
                    .search("diabetes", &[1.0, 0.0, 0.0], &SearchOptions::new(5, 0.3))
                    .await
                    .unwrap();
                assert!(!results.is_empty());
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(engine.len().await, 23);
}
