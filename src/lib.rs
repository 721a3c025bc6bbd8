//! MedRecall - hybrid retrieval over patient medical records
//!
//! Combines BM25 keyword search with vector similarity search, scoped by
//! patient and date metadata, and ranks the fused candidates with a
//! multi-signal scorer that prefers recent, intent-appropriate and diverse
//! results.

pub mod config;
pub mod embedding;
pub mod error;
pub mod keyword;
pub mod logging;
pub mod retrieval;
pub mod scoring;
pub mod store;

pub use error::{RecallError, Result};
