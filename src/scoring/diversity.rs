//! Greedy diversity re-rank

use ahash::{HashMap, HashMapExt};

use super::ScoredCandidate;

/// Penalty units per already-selected result of the same artifact type
pub const SAME_TYPE_PENALTY: f64 = 0.5;
/// Penalty units per already-selected result from the same source artifact
pub const SAME_ARTIFACT_PENALTY: f64 = 1.0;

/// Re-rank `ranked` (best first) trading relevance for diversity.
///
/// Each step picks the remaining candidate with the highest
/// `relevance - diversity_weight * units`, where `units` sums
/// [`SAME_TYPE_PENALTY`] for every selected result sharing its artifact
/// type and [`SAME_ARTIFACT_PENALTY`] for every selected result sharing its
/// artifact id. Ties go to the candidate ranked earlier in the input.
pub fn diversity_rerank(
    ranked: Vec<ScoredCandidate>,
    diversity_weight: f64,
    top_k: Option<usize>,
) -> Vec<ScoredCandidate> {
    let limit = top_k.unwrap_or(ranked.len()).min(ranked.len());
    let mut remaining: Vec<Option<ScoredCandidate>> = ranked.into_iter().map(Some).collect();
    let mut selected = Vec::with_capacity(limit);

    let mut type_counts: HashMap<String, usize> = HashMap::new();
    let mut artifact_counts: HashMap<String, usize> = HashMap::new();

    let penalty_for = |candidate: &ScoredCandidate,
                       type_counts: &HashMap<String, usize>,
                       artifact_counts: &HashMap<String, usize>| {
        let metadata = &candidate.candidate.metadata;
        let same_type = type_counts
            .get(&metadata.artifact_type)
            .copied()
            .unwrap_or(0);
        let same_artifact = artifact_counts
            .get(&metadata.artifact_id)
            .copied()
            .unwrap_or(0);
        diversity_weight
            * (SAME_TYPE_PENALTY * same_type as f64 + SAME_ARTIFACT_PENALTY * same_artifact as f64)
    };

    while selected.len() < limit {
        let mut best: Option<(usize, f64, f64)> = None;
        for (index, slot) in remaining.iter().enumerate() {
            let Some(candidate) = slot else { continue };
            let penalty = penalty_for(candidate, &type_counts, &artifact_counts);
            let adjusted = candidate.relevance - penalty;
            if best.map_or(true, |(_, best_adjusted, _)| adjusted > best_adjusted) {
                best = Some((index, adjusted, penalty));
            }
        }

        let Some((index, adjusted, penalty)) = best else {
            break;
        };
        let Some(mut chosen) = remaining[index].take() else {
            break;
        };

        let metadata = &chosen.candidate.metadata;
        *type_counts.entry(metadata.artifact_type.clone()).or_insert(0) += 1;
        *artifact_counts
            .entry(metadata.artifact_id.clone())
            .or_insert(0) += 1;

        chosen.diversity_penalty = penalty;
        chosen.score = adjusted;
        selected.push(chosen);
    }

    selected
}
