//! Hybrid search engine combining semantic and keyword retrieval
//!
//! Owns the BM25 keyword index and keeps it in step with the external
//! vector and metadata stores: every chunk id indexed here also exists in
//! both stores. Writes are serialised through an ingest lock; searches only
//! take the keyword index read lock.

use ahash::{HashMap, HashMapExt};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::filter::MetadataFilter;
use super::fusion::combine;
use super::recency::RecencyDecay;
use super::snippet::extract_snippet;
use super::{ChunkMetadata, Document, RankedResult, ScoredId, SearchOptions};
use crate::config::SearchConfig;
use crate::embedding::EmbeddingError;
use crate::keyword::{IndexStats, KeywordIndex, KeywordIndexError};
use crate::store::{ChunkRecord, MetadataStore, StoreError, VectorStore};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    #[error("Filtered search requires a patient id")]
    MissingPatientScope,

    #[error("Vector store search failed: {0}")]
    VectorStore(StoreError),

    #[error("Metadata store request failed: {0}")]
    MetadataStore(StoreError),
}

/// Why a single document could not be indexed
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Invalid document {chunk_id}: {reason}")]
    InvalidDocument { chunk_id: String, reason: String },

    #[error("Chunk already indexed: {0}")]
    DuplicateChunk(String),

    #[error("Embedding failed for {chunk_id}: {source}")]
    Embedding {
        chunk_id: String,
        source: EmbeddingError,
    },

    #[error("Vector store rejected {chunk_id}: {source}")]
    VectorStore { chunk_id: String, source: StoreError },

    #[error("Metadata store rejected {chunk_id}: {source}")]
    MetadataStore { chunk_id: String, source: StoreError },

    #[error("Keyword index error: {0}")]
    Keyword(#[from] KeywordIndexError),
}

impl IndexingError {
    /// Chunk id the failure refers to
    pub fn chunk_id(&self) -> &str {
        match self {
            IndexingError::InvalidDocument { chunk_id, .. }
            | IndexingError::Embedding { chunk_id, .. }
            | IndexingError::VectorStore { chunk_id, .. }
            | IndexingError::MetadataStore { chunk_id, .. } => chunk_id,
            IndexingError::DuplicateChunk(chunk_id) => chunk_id,
            IndexingError::Keyword(KeywordIndexError::DuplicateChunk(chunk_id))
            | IndexingError::Keyword(KeywordIndexError::ChunkNotFound(chunk_id)) => chunk_id,
        }
    }
}

#[derive(Debug)]
pub struct IndexFailure {
    pub chunk_id: String,
    pub error: IndexingError,
}

impl From<IndexingError> for IndexFailure {
    fn from(error: IndexingError) -> Self {
        Self {
            chunk_id: error.chunk_id().to_string(),
            error,
        }
    }
}

/// Outcome of a batch add. Indexed documents stay indexed even when
/// others in the same batch fail.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub indexed: Vec<String>,
    pub failed: Vec<IndexFailure>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.chunk_id.as_str()).collect()
    }

    pub fn merge(&mut self, other: IndexReport) {
        self.indexed.extend(other.indexed);
        self.failed.extend(other.failed);
    }

    fn fail(&mut self, error: IndexingError) {
        tracing::warn!(chunk_id = error.chunk_id(), "Failed to index chunk: {}", error);
        self.failed.push(error.into());
    }
}

/// Which external write failed
enum WriteFailure {
    Metadata(StoreError),
    Vector(StoreError),
}

impl WriteFailure {
    fn into_indexing_error(self, chunk_id: &str) -> IndexingError {
        let chunk_id = chunk_id.to_string();
        match self {
            WriteFailure::Metadata(source) => IndexingError::MetadataStore { chunk_id, source },
            WriteFailure::Vector(source) => IndexingError::VectorStore { chunk_id, source },
        }
    }
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteFailure::Metadata(e) => write!(f, "metadata store: {}", e),
            WriteFailure::Vector(e) => write!(f, "vector store: {}", e),
        }
    }
}

/// Hybrid search engine
pub struct HybridSearchEngine {
    keyword_index: RwLock<KeywordIndex>,
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
    /// Single writer for the three-way dual write
    ingest_lock: Mutex<()>,
    filter: MetadataFilter,
    recency: RecencyDecay,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        keyword_index: KeywordIndex,
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            keyword_index: RwLock::new(keyword_index),
            vector_store,
            metadata_store,
            ingest_lock: Mutex::new(()),
            filter: MetadataFilter::new(config.require_patient_id),
            recency: RecencyDecay::new(config.half_life_days),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn validate(doc: &Document) -> Result<(), IndexingError> {
        let invalid = |reason: &str| IndexingError::InvalidDocument {
            chunk_id: doc.chunk_id.clone(),
            reason: reason.to_string(),
        };

        if doc.chunk_id.trim().is_empty() {
            return Err(invalid("chunk id is empty"));
        }
        if doc.embedding.is_empty() {
            return Err(invalid("embedding is empty"));
        }
        if doc.embedding.iter().any(|v| !v.is_finite()) {
            return Err(invalid("embedding contains non-finite values"));
        }
        Ok(())
    }

    /// Write metadata then vectors. A vector failure removes the metadata
    /// rows just written.
    async fn write_external(&self, docs: &[Document]) -> Result<(), WriteFailure> {
        let records: Vec<ChunkRecord> = docs.iter().map(Document::to_record).collect();
        self.metadata_store
            .insert_chunks(&records)
            .await
            .map_err(WriteFailure::Metadata)?;

        let entries: Vec<_> = docs.iter().map(Document::to_vector_entry).collect();
        if let Err(e) = self.vector_store.add_vectors(&entries).await {
            let ids: Vec<String> = docs.iter().map(|d| d.chunk_id.clone()).collect();
            self.compensate_metadata(&ids).await;
            return Err(WriteFailure::Vector(e));
        }

        Ok(())
    }

    async fn compensate_metadata(&self, chunk_ids: &[String]) {
        if let Err(e) = self.metadata_store.delete_chunks(chunk_ids).await {
            tracing::warn!(
                chunks = chunk_ids.len(),
                "Failed to roll back metadata after vector write failure: {}",
                e
            );
        }
    }

    /// Index one document in the keyword index, vector store and metadata store
    pub async fn add_document(&self, doc: Document) -> Result<(), IndexingError> {
        Self::validate(&doc)?;

        let _guard = self.ingest_lock.lock().await;
        self.add_locked(doc).await
    }

    /// Caller holds the ingest lock
    async fn add_locked(&self, doc: Document) -> Result<(), IndexingError> {
        if self.keyword_index.read().await.contains(&doc.chunk_id) {
            return Err(IndexingError::DuplicateChunk(doc.chunk_id));
        }

        self.write_external(std::slice::from_ref(&doc))
            .await
            .map_err(|e| e.into_indexing_error(&doc.chunk_id))?;

        self.keyword_index
            .write()
            .await
            .insert(&doc.chunk_id, &doc.text)?;

        tracing::debug!(chunk_id = %doc.chunk_id, "Indexed chunk");
        Ok(())
    }

    /// Index a batch.
    ///
    /// Each store gets one batched write. If a batched write fails the
    /// documents are retried one at a time so the report names exactly
    /// which chunk ids failed. Successful documents are committed to the
    /// keyword index with a single batch insert.
    pub async fn add_documents(&self, docs: Vec<Document>) -> IndexReport {
        let mut report = IndexReport::default();
        if docs.is_empty() {
            return report;
        }

        let total = docs.len();
        let _guard = self.ingest_lock.lock().await;

        let mut accepted = Vec::with_capacity(docs.len());
        {
            let index = self.keyword_index.read().await;
            let mut seen = HashSet::new();
            for doc in docs {
                if let Err(e) = Self::validate(&doc) {
                    report.fail(e);
                } else if index.contains(&doc.chunk_id) || !seen.insert(doc.chunk_id.clone()) {
                    report.fail(IndexingError::DuplicateChunk(doc.chunk_id));
                } else {
                    accepted.push(doc);
                }
            }
        }

        if accepted.is_empty() {
            return report;
        }

        let written = match self.write_external(&accepted).await {
            Ok(()) => accepted,
            Err(e) => {
                tracing::warn!(
                    batch = accepted.len(),
                    "Batched write failed ({}), retrying per document",
                    e
                );
                let mut written = Vec::with_capacity(accepted.len());
                for doc in accepted {
                    match self.write_external(std::slice::from_ref(&doc)).await {
                        Ok(()) => written.push(doc),
                        Err(e) => report.fail(e.into_indexing_error(&doc.chunk_id)),
                    }
                }
                written
            }
        };

        let pairs: Vec<(String, String)> = written
            .iter()
            .map(|d| (d.chunk_id.clone(), d.text.clone()))
            .collect();

        let keyword_result = self.keyword_index.write().await.insert_batch(&pairs);
        match keyword_result {
            Ok(()) => report.indexed.extend(pairs.into_iter().map(|(id, _)| id)),
            Err(e) => {
                // Duplicates were screened under the ingest lock, so this is
                // unexpected. Undo the external writes to keep the stores aligned.
                let ids: Vec<String> = pairs.into_iter().map(|(id, _)| id).collect();
                if let Err(err) = self.vector_store.delete(&ids).await {
                    tracing::warn!("Failed to roll back vectors: {}", err);
                }
                self.compensate_metadata(&ids).await;
                for chunk_id in ids {
                    report.fail(IndexingError::Keyword(KeywordIndexError::DuplicateChunk(
                        chunk_id,
                    )));
                }
                tracing::warn!("Keyword batch insert failed: {}", e);
            }
        }

        tracing::info!(
            total,
            indexed = report.indexed.len(),
            failed = report.failed.len(),
            "Batch indexing complete"
        );
        report
    }

    /// Remove a chunk from all three stores. Returns `false` if it was not indexed.
    ///
    /// The keyword entry goes last, after both external deletes succeed. If
    /// the metadata delete fails once the vector is gone, the chunk stays
    /// indexed and keyword-searchable until `remove_document` is retried.
    pub async fn remove_document(&self, chunk_id: &str) -> Result<bool, IndexingError> {
        let _guard = self.ingest_lock.lock().await;
        if !self.keyword_index.read().await.contains(chunk_id) {
            return Ok(false);
        }

        let ids = [chunk_id.to_string()];
        self.vector_store
            .delete(&ids)
            .await
            .map_err(|source| IndexingError::VectorStore {
                chunk_id: chunk_id.to_string(),
                source,
            })?;

        if let Err(source) = self.metadata_store.delete_chunks(&ids).await {
            tracing::warn!(
                chunk_id,
                "Vector deleted but metadata delete failed, retry remove to realign stores: {}",
                source
            );
            return Err(IndexingError::MetadataStore {
                chunk_id: chunk_id.to_string(),
                source,
            });
        }
        self.keyword_index.write().await.remove(chunk_id)?;

        tracing::debug!(chunk_id, "Removed chunk");
        Ok(true)
    }

    /// Replace a chunk, or index it when it is not present yet.
    ///
    /// Runs under a single ingest lock. The new metadata and vector overwrite
    /// the old ones before the keyword entry is swapped. If the vector write
    /// fails the previous metadata record is written back and the old chunk
    /// stays searchable.
    pub async fn update_document(&self, doc: Document) -> Result<(), IndexingError> {
        Self::validate(&doc)?;

        let _guard = self.ingest_lock.lock().await;
        if !self.keyword_index.read().await.contains(&doc.chunk_id) {
            return self.add_locked(doc).await;
        }

        let metadata_error = |source: StoreError| IndexingError::MetadataStore {
            chunk_id: doc.chunk_id.clone(),
            source,
        };
        let previous = self
            .metadata_store
            .get_chunks_by_ids(std::slice::from_ref(&doc.chunk_id))
            .await
            .map_err(metadata_error)?;
        self.metadata_store
            .insert_chunks(&[doc.to_record()])
            .await
            .map_err(metadata_error)?;

        if let Err(source) = self.vector_store.add_vectors(&[doc.to_vector_entry()]).await {
            self.restore_metadata(&doc.chunk_id, previous).await;
            return Err(IndexingError::VectorStore {
                chunk_id: doc.chunk_id,
                source,
            });
        }

        {
            let mut index = self.keyword_index.write().await;
            index.remove(&doc.chunk_id)?;
            index.insert(&doc.chunk_id, &doc.text)?;
        }

        tracing::debug!(chunk_id = %doc.chunk_id, "Updated chunk");
        Ok(())
    }

    async fn restore_metadata(&self, chunk_id: &str, previous: Vec<ChunkRecord>) {
        let restored = if previous.is_empty() {
            self.metadata_store
                .delete_chunks(&[chunk_id.to_string()])
                .await
        } else {
            self.metadata_store.insert_chunks(&previous).await
        };
        if let Err(e) = restored {
            tracing::warn!(
                chunk_id,
                "Failed to restore metadata after vector write failure: {}",
                e
            );
        }
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        self.keyword_index.read().await.contains(chunk_id)
    }

    pub async fn len(&self) -> usize {
        self.keyword_index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> IndexStats {
        self.keyword_index.read().await.stats()
    }

    /// Reset the keyword index and both external stores.
    ///
    /// The keyword index is only cleared once both stores are. A failure
    /// leaves it untouched and `clear` can be retried.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.ingest_lock.lock().await;
        self.vector_store.clear().await?;
        if let Err(e) = self.metadata_store.clear().await {
            tracing::warn!(
                "Vector store cleared but metadata clear failed, retry clear to realign stores: {}",
                e
            );
            return Err(e);
        }
        self.keyword_index.write().await.clear();

        tracing::info!("Cleared search index");
        Ok(())
    }

    /// Run a hybrid search.
    ///
    /// Filters (when given) resolve to a candidate set first; an empty set
    /// returns no results without touching either index. Both channels then
    /// fetch `k * candidate_multiplier` results concurrently, are fused with
    /// `alpha` and optional recency boost, truncated to `k` and enriched
    /// with snippets and metadata.
    pub async fn search(
        &self,
        query: &str,
        query_embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        options.validate()?;
        if query_embedding.is_empty() {
            return Err(SearchError::InvalidRequest(
                "query embedding is empty".to_string(),
            ));
        }

        let candidates = match &options.filters {
            Some(filters) => {
                let ids = self
                    .filter
                    .apply(self.metadata_store.as_ref(), filters)
                    .await?;
                if ids.is_empty() {
                    tracing::debug!("No chunks match filters, skipping search");
                    return Ok(Vec::new());
                }
                Some(ids)
            }
            None => None,
        };
        let restrict = candidates.as_ref();

        let fetch_k = options
            .k
            .saturating_mul(self.config.candidate_multiplier.max(1));

        let (semantic, keyword) = tokio::join!(
            self.vector_store.search(query_embedding, fetch_k, restrict),
            async {
                self.keyword_index
                    .read()
                    .await
                    .search(query, restrict, fetch_k)
            }
        );
        let semantic = semantic.map_err(SearchError::VectorStore)?;

        let mut metadata: HashMap<String, ChunkMetadata> = HashMap::new();
        let mut semantic_results = Vec::with_capacity(semantic.len());
        for hit in semantic {
            if restrict.is_some_and(|ids| !ids.contains(&hit.chunk_id)) {
                continue;
            }
            if let Some(meta) = hit.metadata {
                metadata.insert(hit.chunk_id.clone(), meta);
            }
            semantic_results.push(ScoredId::new(hit.chunk_id, f64::from(hit.score)));
        }

        let keyword_results: Vec<ScoredId> = keyword
            .into_iter()
            .map(|hit| ScoredId::new(hit.chunk_id, hit.score))
            .collect();

        tracing::debug!(
            semantic = semantic_results.len(),
            keyword = keyword_results.len(),
            "Retrieved candidates"
        );

        let mut records: HashMap<String, ChunkRecord> = HashMap::new();

        let mut combined = if options.recency_boost {
            let missing: Vec<String> = semantic_results
                .iter()
                .chain(keyword_results.iter())
                .map(|r| &r.chunk_id)
                .filter(|id| !metadata.contains_key(*id))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            self.fetch_records(&missing, &mut records).await?;
            for (id, record) in &records {
                metadata.insert(id.clone(), record.metadata.clone());
            }

            let now = Utc::now();
            let recency = &self.recency;
            let boost = |chunk_id: &str| {
                metadata
                    .get(chunk_id)
                    .map_or(1.0, |meta| recency.boost_at(&meta.occurred_at, now))
            };
            combine(&semantic_results, &keyword_results, options.alpha, Some(boost))
        } else {
            combine(
                &semantic_results,
                &keyword_results,
                options.alpha,
                None::<fn(&str) -> f64>,
            )
        };
        combined.truncate(options.k);

        let missing: Vec<String> = combined
            .iter()
            .filter(|r| !records.contains_key(&r.chunk_id))
            .map(|r| r.chunk_id.clone())
            .collect();
        self.fetch_records(&missing, &mut records).await?;

        let snippet_length = options
            .snippet_length
            .unwrap_or(self.config.default_snippet_length);

        let mut results = Vec::with_capacity(combined.len());
        for result in combined {
            let Some(record) = records.remove(&result.chunk_id) else {
                tracing::warn!(chunk_id = %result.chunk_id, "No metadata record for result, skipping");
                continue;
            };
            let snippet = extract_snippet(&record.text, query, snippet_length);
            results.push(RankedResult::from_combined(result, snippet, record.metadata));
        }

        Ok(results)
    }

    async fn fetch_records(
        &self,
        chunk_ids: &[String],
        records: &mut HashMap<String, ChunkRecord>,
    ) -> Result<(), SearchError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let fetched = self
            .metadata_store
            .get_chunks_by_ids(chunk_ids)
            .await
            .map_err(SearchError::MetadataStore)?;
        for record in fetched {
            records.insert(record.chunk_id.clone(), record);
        }
        Ok(())
    }
}
