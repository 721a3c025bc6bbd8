//! Lexical retrieval: tokenizer and BM25 keyword index.

mod bm25;
mod tokenizer;

pub use bm25::{
    Bm25Document, IndexStats, KeywordIndex, KeywordIndexError, KeywordSearchResult, B, K1,
};
pub use tokenizer::{is_stop_word, tokenize};
