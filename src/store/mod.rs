//! External collaborators of the search engine
//!
//! The engine talks to a nearest-neighbour vector store and a relational
//! metadata store through the traits below. In-memory implementations of
//! both are provided, plus an HNSW-backed vector store and a SQLite-backed
//! metadata store.

mod hnsw;
mod memory;
mod sqlite;

pub use hnsw::HnswVectorStore;
pub use memory::{InMemoryMetadataStore, InMemoryVectorStore};
pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::retrieval::parse_timestamp;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Typed metadata carried by every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub artifact_id: String,
    pub patient_id: String,
    /// e.g. `lab_result`, `medication`, `note`, `imaging`
    pub artifact_type: String,
    /// Raw EMR timestamp, parsed lazily
    pub occurred_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl ChunkMetadata {
    pub fn new(
        artifact_id: impl Into<String>,
        patient_id: impl Into<String>,
        artifact_type: impl Into<String>,
        occurred_at: impl Into<String>,
    ) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            patient_id: patient_id.into(),
            artifact_type: artifact_type.into(),
            occurred_at: occurred_at.into(),
            author: None,
            source_url: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Parsed `occurred_at`, `None` when the raw value is not a recognised timestamp
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.occurred_at)
    }
}

/// Full chunk record as held by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Predicate evaluated by [`MetadataStore::filter_chunks`].
///
/// All present constraints are AND-combined. Date bounds are inclusive.
/// An empty `artifact_types` list places no restriction on type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub patient_id: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub artifact_types: Vec<String>,
}

impl FilterCriteria {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(patient_id) = &self.patient_id {
            if &metadata.patient_id != patient_id {
                return false;
            }
        }

        if !self.artifact_types.is_empty()
            && !self.artifact_types.contains(&metadata.artifact_type)
        {
            return false;
        }

        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }

        // A bound is set, so records without a usable timestamp cannot satisfy it
        let Some(occurred_at) = metadata.occurred_at() else {
            return false;
        };
        if self.date_from.is_some_and(|from| occurred_at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| occurred_at > to) {
            return false;
        }
        true
    }
}

/// Vector plus the metadata stored alongside it
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: String,
    /// Cosine similarity, higher is more similar
    pub score: f32,
    pub metadata: Option<ChunkMetadata>,
}

/// Nearest-neighbour index over chunk embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add vectors. An existing chunk id is replaced.
    async fn add_vectors(&self, entries: &[VectorEntry]) -> Result<(), StoreError>;

    /// Top `k` matches by cosine similarity, best first. When `restrict_to`
    /// is given only those chunk ids are eligible.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        restrict_to: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorMatch>, StoreError>;

    /// Remove vectors. Unknown ids are ignored.
    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// Relational store holding chunk text and metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert records. An existing chunk id is replaced.
    async fn insert_chunks(&self, records: &[ChunkRecord]) -> Result<(), StoreError>;

    /// Ids of every chunk matching `criteria`
    async fn filter_chunks(&self, criteria: &FilterCriteria) -> Result<Vec<String>, StoreError>;

    /// Records for the given ids. Unknown ids are omitted; order is unspecified.
    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Remove records. Unknown ids are ignored.
    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::InvalidDimension { expected, actual });
    }
    Ok(())
}
