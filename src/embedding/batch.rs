/// Batch ingestion: parallel embedding, sequential indexing
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::retrieval::{
    ChunkMetadata, Document, HybridSearchEngine, IndexFailure, IndexReport, IndexingError,
};

/// A chunk waiting to be embedded and indexed
#[derive(Debug, Clone)]
pub struct SourceChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl SourceChunk {
    pub fn new(
        chunk_id: impl Into<String>,
        text: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            text: text.into(),
            metadata,
        }
    }
}

type EmbeddedBatch = Vec<(SourceChunk, Result<Vec<f32>, EmbeddingError>)>;

/// Embeds chunks and feeds them to a [`HybridSearchEngine`].
///
/// Up to `max_concurrent` batches are embedded at once on the blocking
/// pool. Embedded batches are handed to the engine one at a time, in input
/// order, since the engine serialises writes anyway.
pub struct BatchIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    engine: Arc<HybridSearchEngine>,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchIndexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        engine: Arc<HybridSearchEngine>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            engine,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(
        provider: Arc<dyn EmbeddingProvider>,
        engine: Arc<HybridSearchEngine>,
        config: &EmbeddingConfig,
    ) -> Self {
        Self::new(provider, engine, config.batch_size, config.max_concurrent)
    }

    pub fn engine(&self) -> &Arc<HybridSearchEngine> {
        &self.engine
    }

    /// Embed and index `chunks`.
    ///
    /// Embedding failures and indexing failures are both reported per chunk
    /// id; every other chunk is indexed.
    pub async fn index(&self, chunks: Vec<SourceChunk>) -> IndexReport {
        let start = std::time::Instant::now();
        let total = chunks.len();
        let mut report = IndexReport::default();
        if chunks.is_empty() {
            return report;
        }

        info!(total, batch_size = self.batch_size, "Starting batch indexing");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut pending: Vec<(Vec<String>, JoinHandle<EmbeddedBatch>)> = Vec::new();

        let mut chunks = chunks.into_iter().peekable();
        while chunks.peek().is_some() {
            let batch: Vec<SourceChunk> = chunks.by_ref().take(self.batch_size).collect();
            let ids = batch.iter().map(|c| c.chunk_id.clone()).collect();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return closed_batch(batch);
                };
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                match tokio::task::spawn_blocking(move || embed_isolated(provider.as_ref(), &texts))
                    .await
                {
                    Ok(results) => batch.into_iter().zip(results).collect(),
                    Err(e) => {
                        let message = format!("embedding task failed: {}", e);
                        batch
                            .into_iter()
                            .map(|c| (c, Err(EmbeddingError::Generation(message.clone()))))
                            .collect()
                    }
                }
            });
            pending.push((ids, handle));
        }

        for (ids, handle) in pending {
            let embedded = match handle.await {
                Ok(embedded) => embedded,
                Err(e) => {
                    warn!("Embedding batch aborted: {}", e);
                    for chunk_id in ids {
                        report.failed.push(IndexFailure::from(IndexingError::Embedding {
                            chunk_id,
                            source: EmbeddingError::Generation(e.to_string()),
                        }));
                    }
                    continue;
                }
            };

            let mut documents = Vec::with_capacity(embedded.len());
            for (chunk, result) in embedded {
                match result {
                    Ok(embedding) => documents.push(Document::new(
                        chunk.chunk_id,
                        chunk.text,
                        embedding,
                        chunk.metadata,
                    )),
                    Err(source) => {
                        warn!(chunk_id = %chunk.chunk_id, "Embedding failed: {}", source);
                        report.failed.push(IndexFailure::from(IndexingError::Embedding {
                            chunk_id: chunk.chunk_id,
                            source,
                        }));
                    }
                }
            }

            debug!(documents = documents.len(), "Indexing embedded batch");
            report.merge(self.engine.add_documents(documents).await);
        }

        info!(
            total,
            indexed = report.indexed.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch indexing complete"
        );
        report
    }
}

/// Embed a batch, falling back to one call per text when the batched call
/// fails so a single bad text does not take its neighbours down.
fn embed_isolated(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Vec<Result<Vec<f32>, EmbeddingError>> {
    let non_empty: Vec<String> = texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect();

    if non_empty.len() == texts.len() {
        match provider.embed_batch(texts) {
            Ok(embeddings) if embeddings.len() == texts.len() => {
                return embeddings.into_iter().map(Ok).collect();
            }
            Ok(embeddings) => warn!(
                expected = texts.len(),
                actual = embeddings.len(),
                "Embedding count mismatch, embedding individually"
            ),
            Err(e) => warn!("Batch embedding failed ({}), embedding individually", e),
        }
    }

    texts
        .iter()
        .map(|text| {
            if text.trim().is_empty() {
                Err(EmbeddingError::InvalidInput("Empty text".to_string()))
            } else {
                provider.embed(text)
            }
        })
        .collect()
}

fn closed_batch(batch: Vec<SourceChunk>) -> EmbeddedBatch {
    batch
        .into_iter()
        .map(|c| {
            (
                c,
                Err(EmbeddingError::Generation(
                    "embedding semaphore closed".to_string(),
                )),
            )
        })
        .collect()
}
