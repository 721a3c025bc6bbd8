//! Hybrid retrieval
//!
//! Combines BM25 keyword search with vector similarity search over patient
//! record chunks: metadata pre-filtering, min-max normalization, alpha
//! fusion, half-life recency decay and snippet enrichment.

mod filter;
mod fusion;
mod hybrid;
mod normalize;
mod recency;
mod snippet;

pub use filter::MetadataFilter;
pub use fusion::{combine, combine_scores};
pub use hybrid::{HybridSearchEngine, IndexFailure, IndexReport, IndexingError, SearchError};
pub use normalize::normalize;
pub use recency::{
    age_days, half_life_decay, parse_timestamp, RecencyDecay, DEFAULT_HALF_LIFE_DAYS,
};
pub use snippet::extract_snippet;

pub use crate::store::ChunkMetadata;

use crate::store::{ChunkRecord, VectorEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Intermediate result of a single retrieval channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub chunk_id: String,
    pub score: f64,
}

impl ScoredId {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// Fused result. Component scores are kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    pub chunk_id: String,
    pub score: f64,
    /// Normalized semantic score, 0 when the chunk was keyword-only
    pub semantic_score: f64,
    /// Normalized keyword score, 0 when the chunk was semantic-only
    pub keyword_score: f64,
    pub recency_boost: f64,
}

/// Final, enriched search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub score: f64,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub recency_boost: f64,
    pub snippet: String,
    pub metadata: ChunkMetadata,
}

impl RankedResult {
    fn from_combined(result: CombinedResult, snippet: String, metadata: ChunkMetadata) -> Self {
        Self {
            chunk_id: result.chunk_id,
            score: result.score,
            semantic_score: result.semantic_score,
            keyword_score: result.keyword_score,
            recency_boost: result.recency_boost,
            snippet,
            metadata,
        }
    }
}

/// Unit of indexing. One logical record split across the keyword index,
/// the vector store and the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Document {
    pub fn new(
        chunk_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            text: text.into(),
            embedding,
            metadata,
        }
    }

    pub(crate) fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            chunk_id: self.chunk_id.clone(),
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub(crate) fn to_vector_entry(&self) -> VectorEntry {
        VectorEntry {
            chunk_id: self.chunk_id.clone(),
            vector: self.embedding.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Metadata constraints applied before any scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub patient_id: Option<String>,
    /// Inclusive lower bound on `occurred_at`
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`
    pub date_to: Option<DateTime<Utc>>,
    /// Allowed artifact types. `None` or empty means any type.
    pub artifact_types: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifact_types = Some(types.into_iter().map(Into::into).collect());
        self
    }
}

/// Per-query options. `alpha` has no default: callers pick the blend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Number of results to return
    pub k: usize,
    /// 1.0 is pure semantic, 0.0 pure keyword
    pub alpha: f64,
    pub filters: Option<SearchFilters>,
    pub recency_boost: bool,
    /// Snippet length in characters, engine default when `None`
    pub snippet_length: Option<usize>,
}

impl SearchOptions {
    pub fn new(k: usize, alpha: f64) -> Self {
        Self {
            k,
            alpha,
            filters: None,
            recency_boost: false,
            snippet_length: None,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_recency_boost(mut self, enabled: bool) -> Self {
        self.recency_boost = enabled;
        self
    }

    pub fn with_snippet_length(mut self, length: usize) -> Self {
        self.snippet_length = Some(length);
        self
    }

    /// Reject malformed options before any index work.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.k == 0 {
            return Err(SearchError::InvalidRequest(
                "k must be greater than 0".to_string(),
            ));
        }

        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(SearchError::InvalidRequest(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }

        if self.snippet_length == Some(0) {
            return Err(SearchError::InvalidRequest(
                "snippet_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
