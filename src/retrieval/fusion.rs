//! Alpha-weighted fusion of normalized semantic and keyword scores

use super::normalize::normalize;
use super::{CombinedResult, ScoredId};
use ahash::{HashMap, HashMapExt};

/// Component scores and channel positions of one chunk in the union
#[derive(Debug, Clone, Copy, Default)]
struct Components {
    semantic: f64,
    keyword: f64,
    semantic_rank: Option<usize>,
    keyword_rank: Option<usize>,
}

/// Fuse two result channels.
///
/// Each channel is min-max normalized on its own, then for every chunk in
/// the union `alpha * semantic + (1 - alpha) * keyword` is multiplied by the
/// chunk's recency boost (1.0 when `recency` is `None`). A chunk missing from
/// one channel gets 0 for that component.
///
/// Output is sorted by final score, descending. Ties are broken on the
/// dominant channel (keyword when `alpha < 0.5`, semantic otherwise): higher
/// component score first, then that channel's original position, then the
/// other channel's position. At `alpha = 0` the order therefore matches the
/// keyword channel alone, and at `alpha = 1` the semantic channel alone.
pub fn combine<F>(
    semantic_results: &[ScoredId],
    keyword_results: &[ScoredId],
    alpha: f64,
    recency: Option<F>,
) -> Vec<CombinedResult>
where
    F: Fn(&str) -> f64,
{
    let semantic = normalize(semantic_results);
    let keyword = normalize(keyword_results);

    let mut order: Vec<&str> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut components: HashMap<&str, Components> = HashMap::with_capacity(order.capacity());

    for (rank, result) in semantic.iter().enumerate() {
        let entry = components
            .entry(result.chunk_id.as_str())
            .or_insert_with(|| {
                order.push(result.chunk_id.as_str());
                Components::default()
            });
        entry.semantic = entry.semantic.max(result.score);
        entry.semantic_rank.get_or_insert(rank);
    }

    for (rank, result) in keyword.iter().enumerate() {
        let entry = components
            .entry(result.chunk_id.as_str())
            .or_insert_with(|| {
                order.push(result.chunk_id.as_str());
                Components::default()
            });
        entry.keyword = entry.keyword.max(result.score);
        entry.keyword_rank.get_or_insert(rank);
    }

    let mut ranked: Vec<(CombinedResult, Components)> = order
        .into_iter()
        .map(|chunk_id| {
            let parts = components[chunk_id];
            let base = alpha * parts.semantic + (1.0 - alpha) * parts.keyword;
            let recency_boost = recency.as_ref().map_or(1.0, |boost| boost(chunk_id));

            let result = CombinedResult {
                chunk_id: chunk_id.to_string(),
                score: base * recency_boost,
                semantic_score: parts.semantic,
                keyword_score: parts.keyword,
                recency_boost,
            };
            (result, parts)
        })
        .collect();

    let keyword_dominant = alpha < 0.5;
    let position = |rank: Option<usize>| rank.unwrap_or(usize::MAX);

    ranked.sort_by(|(a, pa), (b, pb)| {
        let (a_lead, b_lead, a_rank, b_rank, a_other, b_other) = if keyword_dominant {
            (pa.keyword, pb.keyword, pa.keyword_rank, pb.keyword_rank, pa.semantic_rank, pb.semantic_rank)
        } else {
            (pa.semantic, pb.semantic, pa.semantic_rank, pb.semantic_rank, pa.keyword_rank, pb.keyword_rank)
        };

        b.score
            .total_cmp(&a.score)
            .then_with(|| b_lead.total_cmp(&a_lead))
            .then_with(|| position(a_rank).cmp(&position(b_rank)))
            .then_with(|| position(a_other).cmp(&position(b_other)))
    });

    ranked.into_iter().map(|(result, _)| result).collect()
}

/// [`combine`] without a recency boost.
pub fn combine_scores(
    semantic_results: &[ScoredId],
    keyword_results: &[ScoredId],
    alpha: f64,
) -> Vec<CombinedResult> {
    combine(semantic_results, keyword_results, alpha, None::<fn(&str) -> f64>)
}
