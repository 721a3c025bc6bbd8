//! Embedding generation and batch ingestion
//!
//! - `EmbeddingProvider` trait for abstraction over embedding backends
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - `BatchIndexer` for parallel embedding feeding the hybrid search engine

mod batch;
mod provider;

pub use batch::{BatchIndexer, SourceChunk};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
