//! Multi-signal retrieval scorer
//!
//! A second ranking path, independent of the hybrid engine, that scores a
//! candidate against four signals:
//!
//! - semantic: the candidate's vector similarity, clamped to [0, 1]
//! - keyword: BM25 against a fixed assumed average length, scaled to [0, 1)
//! - recency: `exp(-rate * age_days)`
//! - type preference: intent × artifact-type lookup
//!
//! and combines them with configurable weights. A diversity-aware re-rank
//! is available on top of the plain ranking.

mod diversity;
mod intent;
mod preference;

pub use diversity::{diversity_rerank, SAME_ARTIFACT_PENALTY, SAME_TYPE_PENALTY};
pub use intent::QueryIntent;
pub use preference::TypePreferenceTable;

pub use crate::config::{ScorerConfig, SignalWeights};

use ahash::{HashMap, HashMapExt};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::keyword::{tokenize, B, K1};
use crate::retrieval::{age_days, parse_timestamp};
use crate::store::ChunkMetadata;

/// Tolerance for the weight-sum check
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Candidate handed to the scorer
#[derive(Debug, Clone, Serialize)]
pub struct ScoringCandidate {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Vector similarity from the retrieval step
    pub similarity: f64,
}

/// Raw per-signal values, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalScores {
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
    pub type_preference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: ScoringCandidate,
    pub signals: SignalScores,
    /// Weighted sum of the signals
    pub relevance: f64,
    /// Ranking score: `relevance - diversity_penalty`
    pub score: f64,
    pub diversity_penalty: f64,
}

/// Per-query state shared by every candidate
struct QueryContext {
    unique_tokens: Vec<String>,
    intent: QueryIntent,
    now: DateTime<Utc>,
}

impl QueryContext {
    fn new(query: &str, now: DateTime<Utc>) -> Self {
        let mut unique_tokens = tokenize(query);
        let mut seen = std::collections::HashSet::new();
        unique_tokens.retain(|token| seen.insert(token.clone()));

        Self {
            unique_tokens,
            intent: QueryIntent::detect(query),
            now,
        }
    }
}

pub struct RetrievalScorer {
    config: ScorerConfig,
    preferences: TypePreferenceTable,
}

impl Default for RetrievalScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl RetrievalScorer {
    /// Weights that do not sum to 1.0 are accepted with a warning.
    pub fn new(config: ScorerConfig) -> Self {
        let sum = config.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            tracing::warn!(sum, "Scorer weights do not sum to 1.0");
        }

        let preferences = TypePreferenceTable::with_overrides(&config.type_preferences);
        Self {
            config,
            preferences,
        }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Simplified BM25 over `text` using the configured assumed average
    /// document length instead of corpus statistics.
    ///
    /// Each unique query token contributes `tf(k1+1) / (tf + k1(1 - b + b·len/avg))`;
    /// the sum is divided by `(k1 + 1) * unique_tokens` so the result lies in [0, 1).
    pub fn keyword_match(&self, query: &str, text: &str) -> f64 {
        let context = QueryContext::new(query, Utc::now());
        self.keyword_signal(&context.unique_tokens, text)
    }

    fn keyword_signal(&self, unique_tokens: &[String], text: &str) -> f64 {
        if unique_tokens.is_empty() {
            return 0.0;
        }

        let doc_tokens = tokenize(text);
        if doc_tokens.is_empty() {
            return 0.0;
        }

        let mut term_freqs: HashMap<&str, u32> = HashMap::new();
        for token in &doc_tokens {
            *term_freqs.entry(token.as_str()).or_insert(0) += 1;
        }

        let length_ratio = doc_tokens.len() as f64 / self.config.assumed_avg_doc_length;
        let norm = K1 * (1.0 - B + B * length_ratio);

        let sum: f64 = unique_tokens
            .iter()
            .filter_map(|token| term_freqs.get(token.as_str()))
            .map(|&tf| {
                let tf = tf as f64;
                tf * (K1 + 1.0) / (tf + norm)
            })
            .sum();

        sum / ((K1 + 1.0) * unique_tokens.len() as f64)
    }

    /// `exp(-rate * age_days)` relative to `now`.
    ///
    /// Unparseable and future timestamps yield 1.0.
    pub fn recency(&self, occurred_at: &str, now: DateTime<Utc>) -> f64 {
        match parse_timestamp(occurred_at) {
            Some(ts) => (-self.config.recency_decay_rate * age_days(ts, now)).exp(),
            None => {
                tracing::warn!(occurred_at, "Unparseable timestamp, recency signal set to 1.0");
                1.0
            }
        }
    }

    pub fn type_preference(&self, intent: QueryIntent, artifact_type: &str) -> f64 {
        self.preferences.preference(intent, artifact_type)
    }

    fn score_with(&self, context: &QueryContext, candidate: ScoringCandidate) -> ScoredCandidate {
        let signals = SignalScores {
            semantic: if candidate.similarity.is_finite() {
                candidate.similarity.clamp(0.0, 1.0)
            } else {
                0.0
            },
            keyword: self.keyword_signal(&context.unique_tokens, &candidate.text),
            recency: self.recency(&candidate.metadata.occurred_at, context.now),
            type_preference: self.type_preference(context.intent, &candidate.metadata.artifact_type),
        };

        let weights = &self.config.weights;
        let relevance = weights.semantic * signals.semantic
            + weights.keyword * signals.keyword
            + weights.recency * signals.recency
            + weights.type_preference * signals.type_preference;

        ScoredCandidate {
            candidate,
            signals,
            relevance,
            score: relevance,
            diversity_penalty: 0.0,
        }
    }

    /// Score one candidate against `query` as of now
    pub fn score_candidate(&self, query: &str, candidate: ScoringCandidate) -> ScoredCandidate {
        self.score_with(&QueryContext::new(query, Utc::now()), candidate)
    }

    /// Score and sort candidates, best first. The sort is stable; `top_k`
    /// truncates when given.
    pub fn rank_candidates(
        &self,
        query: &str,
        candidates: Vec<ScoringCandidate>,
        top_k: Option<usize>,
    ) -> Vec<ScoredCandidate> {
        self.rank_candidates_at(query, candidates, top_k, Utc::now())
    }

    /// [`rank_candidates`](Self::rank_candidates) with an explicit clock
    pub fn rank_candidates_at(
        &self,
        query: &str,
        candidates: Vec<ScoringCandidate>,
        top_k: Option<usize>,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let context = QueryContext::new(query, now);
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| self.score_with(&context, candidate))
            .collect();

        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        if let Some(k) = top_k {
            scored.truncate(k);
        }
        scored
    }

    /// Rank, then re-rank for diversity using the configured weight
    pub fn diversity_rank(
        &self,
        query: &str,
        candidates: Vec<ScoringCandidate>,
        top_k: Option<usize>,
    ) -> Vec<ScoredCandidate> {
        self.diversity_rank_at(query, candidates, top_k, Utc::now())
    }

    pub fn diversity_rank_at(
        &self,
        query: &str,
        candidates: Vec<ScoringCandidate>,
        top_k: Option<usize>,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let ranked = self.rank_candidates_at(query, candidates, None, now);
        diversity_rerank(ranked, self.config.diversity_weight, top_k)
    }

    /// Per-signal breakdown of a scored candidate as JSON
    pub fn explain(&self, scored: &ScoredCandidate) -> serde_json::Value {
        let signals = &scored.signals;
        let values = [
            signals.semantic,
            signals.keyword,
            signals.recency,
            signals.type_preference,
        ];

        let breakdown: serde_json::Map<String, serde_json::Value> = self
            .config
            .weights
            .values()
            .into_iter()
            .zip(values)
            .map(|((name, weight), value)| {
                (
                    name.to_string(),
                    serde_json::json!({
                        "value": value,
                        "weight": weight,
                        "contribution": weight * value,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "chunk_id": scored.candidate.chunk_id,
            "artifact_type": scored.candidate.metadata.artifact_type,
            "relevance": scored.relevance,
            "diversity_penalty": scored.diversity_penalty,
            "score": scored.score,
            "signals": breakdown,
        })
    }
}
