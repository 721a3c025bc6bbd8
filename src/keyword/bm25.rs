//! In-memory BM25 keyword index.
//!
//! Holds one record per chunk plus the global statistics BM25 needs
//! (document frequency per term, document count and average length).
//! All mutation goes through `&mut self`; the owner wraps the index in a
//! lock so each insert or batch is observed atomically by readers.

use ahash::{HashMap, HashMapExt};
use std::collections::HashSet;
use thiserror::Error;

use super::tokenizer::tokenize;

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Length-normalization strength.
pub const B: f64 = 0.75;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeywordIndexError {
    #[error("Chunk already indexed: {0}")]
    DuplicateChunk(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
}

/// Per-chunk BM25 record. Derived from the chunk text at insertion time and
/// never mutated afterwards; updates are remove + insert.
#[derive(Debug, Clone)]
pub struct Bm25Document {
    pub chunk_id: String,
    pub tokens: Vec<String>,
    pub length: usize,
    pub term_freqs: HashMap<String, u32>,
    /// Insertion sequence, used as the tie-break for equal scores
    seq: u64,
}

impl Bm25Document {
    fn build(chunk_id: &str, text: &str, seq: u64) -> Self {
        let tokens = tokenize(text);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }

        Self {
            chunk_id: chunk_id.to_string(),
            length: tokens.len(),
            tokens,
            term_freqs,
            seq,
        }
    }
}

/// Search result with chunk ID and BM25 relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSearchResult {
    pub chunk_id: String,
    pub score: f64,
}

/// Snapshot of the global index statistics
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    /// Number of distinct terms with a non-zero document frequency
    pub total_terms: usize,
    pub average_document_length: f64,
}

/// BM25 keyword index over chunk text.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    documents: HashMap<String, Bm25Document>,
    document_frequency: HashMap<String, usize>,
    total_documents: usize,
    total_length: u64,
    average_document_length: f64,
    next_seq: u64,
}

impl KeywordIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            document_frequency: HashMap::new(),
            total_documents: 0,
            total_length: 0,
            average_document_length: 0.0,
            next_seq: 0,
        }
    }

    /// Insert a single chunk.
    pub fn insert(&mut self, chunk_id: &str, text: &str) -> Result<(), KeywordIndexError> {
        if self.documents.contains_key(chunk_id) {
            return Err(KeywordIndexError::DuplicateChunk(chunk_id.to_string()));
        }

        let document = Bm25Document::build(chunk_id, text, self.next_seq);
        self.next_seq += 1;
        self.apply(document);
        self.recompute_average();

        tracing::debug!(
            chunk_id,
            total_documents = self.total_documents,
            "Indexed chunk for keyword search"
        );
        Ok(())
    }

    /// Insert a batch of `(chunk_id, text)` pairs.
    ///
    /// The batch is checked for duplicates (against the index and within
    /// itself) before anything is mutated, so a rejected batch leaves the
    /// index untouched. The average length is recomputed once at the end.
    pub fn insert_batch(&mut self, documents: &[(String, String)]) -> Result<(), KeywordIndexError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(documents.len());
        for (chunk_id, _) in documents {
            if self.documents.contains_key(chunk_id) || !seen.insert(chunk_id.as_str()) {
                return Err(KeywordIndexError::DuplicateChunk(chunk_id.clone()));
            }
        }

        for (chunk_id, text) in documents {
            let document = Bm25Document::build(chunk_id, text, self.next_seq);
            self.next_seq += 1;
            self.apply(document);
        }
        self.recompute_average();

        tracing::debug!(
            batch = documents.len(),
            total_documents = self.total_documents,
            "Indexed chunk batch for keyword search"
        );
        Ok(())
    }

    /// Remove a chunk, reversing its contribution to the global statistics.
    pub fn remove(&mut self, chunk_id: &str) -> Result<Bm25Document, KeywordIndexError> {
        let document = self
            .documents
            .remove(chunk_id)
            .ok_or_else(|| KeywordIndexError::ChunkNotFound(chunk_id.to_string()))?;

        for term in document.term_freqs.keys() {
            if let Some(df) = self.document_frequency.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.document_frequency.remove(term);
                }
            }
        }
        self.total_documents -= 1;
        self.total_length -= document.length as u64;
        self.recompute_average();

        Ok(document)
    }

    fn apply(&mut self, document: Bm25Document) {
        for term in document.term_freqs.keys() {
            *self.document_frequency.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_documents += 1;
        self.total_length += document.length as u64;
        self.documents.insert(document.chunk_id.clone(), document);
    }

    fn recompute_average(&mut self) {
        self.average_document_length = if self.total_documents == 0 {
            0.0
        } else {
            self.total_length as f64 / self.total_documents as f64
        };
    }

    /// BM25 score of `chunk_id` for the given query tokens.
    ///
    /// Every entry of `query_tokens` contributes, so a repeated token counts
    /// twice. Unknown chunks and absent terms score 0.
    pub fn score(&self, query_tokens: &[String], chunk_id: &str) -> f64 {
        match self.documents.get(chunk_id) {
            Some(document) => self.score_document(query_tokens, document),
            None => 0.0,
        }
    }

    fn score_document(&self, query_tokens: &[String], document: &Bm25Document) -> f64 {
        let n = self.total_documents as f64;
        let length_norm = if self.average_document_length > 0.0 {
            1.0 - B + B * (document.length as f64 / self.average_document_length)
        } else {
            1.0
        };

        query_tokens
            .iter()
            .filter_map(|term| {
                let tf = *document.term_freqs.get(term)? as f64;
                let df = self.document_frequency.get(term).copied().unwrap_or(0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                Some(idf * (tf * (K1 + 1.0)) / (tf + K1 * length_norm))
            })
            .sum()
    }

    /// Rank chunks against a free-text query.
    ///
    /// Only chunks in `candidate_ids` are scored when a restriction is given.
    /// Zero-score chunks are dropped; equal scores keep insertion order.
    /// A query with no usable tokens returns an empty list.
    pub fn search(
        &self,
        query: &str,
        candidate_ids: Option<&HashSet<String>>,
        k: usize,
    ) -> Vec<KeywordSearchResult> {
        let mut seen = HashSet::new();
        let query_tokens: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|token| seen.insert(token.clone()))
            .collect();

        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(u64, &str, f64)> = match candidate_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.documents.get(id))
                .map(|doc| (doc.seq, doc.chunk_id.as_str(), self.score_document(&query_tokens, doc)))
                .collect(),
            None => self
                .documents
                .values()
                .map(|doc| (doc.seq, doc.chunk_id.as_str(), self.score_document(&query_tokens, doc)))
                .collect(),
        };

        scored.retain(|(_, _, score)| *score > 0.0);
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(_, chunk_id, score)| KeywordSearchResult {
                chunk_id: chunk_id.to_string(),
                score,
            })
            .collect()
    }

    /// Reset to an empty index
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.documents.contains_key(chunk_id)
    }

    pub fn document(&self, chunk_id: &str) -> Option<&Bm25Document> {
        self.documents.get(chunk_id)
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.document_frequency.get(term).copied().unwrap_or(0)
    }

    pub fn average_document_length(&self) -> f64 {
        self.average_document_length
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> usize {
        self.total_documents
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.total_documents == 0
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.total_documents,
            total_terms: self.document_frequency.len(),
            average_document_length: self.average_document_length,
        }
    }
}
