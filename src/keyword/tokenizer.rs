//! Query and document tokenization shared by the BM25 index, the snippet
//! extractor and the multi-signal scorer.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Fixed English stop-word list: articles, conjunctions, common
/// prepositions, auxiliaries and pronouns.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "among", "an", "and", "any",
    "are", "around", "as", "at", "be", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "he", "her", "here", "him", "his", "how", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "most", "my", "nor", "now", "of", "off", "on",
    "once", "only", "or", "other", "our", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "within",
    "without", "would", "yet", "you", "your",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Returns true if `token` is in the fixed stop-word list.
pub fn is_stop_word(token: &str) -> bool {
    stop_words().contains(token)
}

/// Tokenize raw text into lowercase alphanumeric terms.
///
/// Non-alphanumeric characters act as separators, single-character tokens
/// and stop words are dropped. Order is preserved and duplicates are kept.
/// Empty or punctuation-only input yields an empty vector.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .filter(|token| !is_stop_word(token))
        .map(str::to_string)
        .collect()
}
